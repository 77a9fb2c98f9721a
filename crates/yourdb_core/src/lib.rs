//! # YourDB Core
//!
//! An embedded, single-process object store. Entities are named
//! collections of schema-validated records identified by a declared
//! primary key; each entity pairs an append-only log segment on disk with
//! an in-memory record set and secondary indexes.
//!
//! This crate provides:
//! - [`Catalog`] - entity lifecycles within one database root
//! - [`Entity`] - CRUD and filtered queries behind a writer-preference gate
//! - [`Schema`] - field declarations, validation, and upgrade chains
//! - [`Filter`] - conjunctive equality/comparison filters with an
//!   index-seeded access path
//! - log compaction that preserves the live set under concurrent readers
//!   and writers
//!
//! ## Durability
//!
//! A mutation returns success only after its framed op is flushed and
//! fsynced to the entity's log, so a cold open replays back to the exact
//! acknowledged live set. A crash mid-frame leaves a truncated tail that
//! replay discards.
//!
//! ## Usage
//!
//! ```no_run
//! use yourdb_core::{Catalog, CmpOp, Config, Filter, Record, Schema, ValueKind};
//!
//! let catalog = Catalog::open("people.db", Config::default())?;
//! let people = catalog.create_entity(
//!     Schema::new("people", "id")
//!         .field("id", ValueKind::Int)
//!         .field("name", ValueKind::Str)
//!         .field("age", ValueKind::Int)
//!         .field("city", ValueKind::Str)
//!         .index("city"),
//! )?;
//!
//! people.insert(Record::new().with("id", 1).with("name", "ada").with("age", 36).with("city", "LON"))?;
//!
//! // city == "LON" AND age > 30
//! let filter = Filter::new()
//!     .field_eq("city", "LON")
//!     .field_cmp("age", CmpOp::Gt, 30);
//! let hits = people.select(Some(&filter))?;
//! assert_eq!(hits.len(), 1);
//! # Ok::<(), yourdb_core::EngineError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod compact;
mod config;
mod entity;
mod error;
mod index;
mod log;
mod query;
mod schema;

pub mod gate;

pub use catalog::{Catalog, CATALOG_MAGIC, CATALOG_META_VERSION};
pub use config::Config;
pub use entity::Entity;
pub use error::{EngineError, EngineResult};
pub use query::{Clause, CmpOp, Filter};
pub use schema::{coerce_kind, Schema, UpgradeFn, SCHEMA_MAGIC, SCHEMA_META_VERSION};

pub use yourdb_codec::{Record, Value, ValueKind};
