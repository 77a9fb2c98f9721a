//! Filters and the query planner.
//!
//! A filter is a conjunction of per-field clauses. A clause is either a
//! scalar equality (`{field: value}`) or a set of comparison operators
//! (`{field: {"$gt": v, "$lte": w}}`). Top-level fields are AND-combined.
//!
//! Planning is deliberately simple: among scalar equalities on indexed
//! fields, the smallest bucket seeds the candidate set; every other
//! predicate filters linearly. Anything else is a full scan.

use crate::error::{EngineError, EngineResult};
use crate::index::IndexSet;
use crate::schema::{coerce_kind, Schema};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use yourdb_codec::{Record, Value};

/// A comparison operator in a filter clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `$eq` - equal.
    Eq,
    /// `$ne` - not equal.
    Ne,
    /// `$gt` - greater than.
    Gt,
    /// `$gte` - greater than or equal.
    Gte,
    /// `$lt` - less than.
    Lt,
    /// `$lte` - less than or equal.
    Lte,
}

impl CmpOp {
    /// The `$`-prefixed token used by the external filter grammar.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
        }
    }

    /// Parses a `$`-prefixed grammar token.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            _ => None,
        }
    }

    /// Evaluates `value <op> operand`.
    fn matches(self, value: &Value, operand: &Value) -> bool {
        match self {
            Self::Eq => value == operand,
            Self::Ne => value != operand,
            Self::Gt => value.compare(operand) == Some(Ordering::Greater),
            Self::Gte => matches!(
                value.compare(operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt => value.compare(operand) == Some(Ordering::Less),
            Self::Lte => matches!(
                value.compare(operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
        }
    }
}

/// The constraint a filter places on one field.
#[derive(Debug, Clone)]
pub enum Clause {
    /// Scalar equality, eligible to seed an index lookup.
    Eq(Value),
    /// Conjunction of comparison operators.
    Cmp(Vec<(CmpOp, Value)>),
}

/// A conjunctive filter over record fields.
///
/// # Example
///
/// ```
/// use yourdb_core::{CmpOp, Filter};
///
/// // city == "NY" AND age > 30
/// let filter = Filter::new()
///     .field_eq("city", "NY")
///     .field_cmp("age", CmpOp::Gt, 30);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: BTreeMap<String, Clause>,
}

impl Filter {
    /// Creates an empty filter (matches every record).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a scalar equality clause on a field.
    ///
    /// Replaces any previous clause on the same field.
    #[must_use]
    pub fn field_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.insert(field.into(), Clause::Eq(value.into()));
        self
    }

    /// Adds a comparison operator on a field.
    ///
    /// Multiple operators on the same field are AND-combined; a prior
    /// scalar equality on the field folds into the operator set.
    #[must_use]
    pub fn field_cmp(
        mut self,
        field: impl Into<String>,
        op: CmpOp,
        operand: impl Into<Value>,
    ) -> Self {
        let field = field.into();
        let operand = operand.into();
        let ops = match self.clauses.remove(&field) {
            Some(Clause::Cmp(mut ops)) => {
                ops.push((op, operand));
                ops
            }
            Some(Clause::Eq(prev)) => vec![(CmpOp::Eq, prev), (op, operand)],
            None => vec![(op, operand)],
        };
        self.clauses.insert(field, Clause::Cmp(ops));
        self
    }

    /// Returns true when the filter has no clauses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub(crate) fn clauses(&self) -> impl Iterator<Item = (&String, &Clause)> {
        self.clauses.iter()
    }

    /// Checks every clause against the schema: the field must be declared
    /// and each operand must have the field's kind.
    pub(crate) fn check(&self, schema: &Schema) -> EngineResult<()> {
        for (field, clause) in &self.clauses {
            let kind = schema.field_kind(field).ok_or_else(|| {
                EngineError::schema_violation(field, "a declared field", "undeclared")
            })?;
            match clause {
                Clause::Eq(value) => {
                    coerce_kind(field, value.clone(), kind)?;
                }
                Clause::Cmp(ops) => {
                    for (_, operand) in ops {
                        coerce_kind(field, operand.clone(), kind)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Evaluates all clauses conjunctively against a record.
    pub(crate) fn matches(&self, record: &Record) -> bool {
        self.clauses.iter().all(|(field, clause)| {
            let Some(value) = record.get(field) else {
                return false;
            };
            match clause {
                Clause::Eq(operand) => value == operand,
                Clause::Cmp(ops) => ops.iter().all(|(op, operand)| op.matches(value, operand)),
            }
        })
    }
}

/// The access path chosen for a filter.
#[derive(Debug)]
pub(crate) enum Plan {
    /// Every live record is a candidate.
    FullScan,
    /// An indexed equality seeds the candidate set.
    IndexSeed {
        /// The indexed field whose bucket seeds the candidates.
        field: String,
        /// Primary keys in the seed bucket.
        pks: Vec<Value>,
    },
}

impl Plan {
    /// Number of candidate records this plan will examine.
    pub(crate) fn candidates(&self, index: &IndexSet) -> usize {
        match self {
            Self::FullScan => index.len(),
            Self::IndexSeed { pks, .. } => pks.len(),
        }
    }
}

/// Picks the access path for a filter.
///
/// Among scalar equalities on indexed fields, the smallest bucket wins the
/// tie-break; a filter with no indexed equality falls back to a full scan.
pub(crate) fn plan(filter: Option<&Filter>, schema: &Schema, index: &IndexSet) -> Plan {
    let Some(filter) = filter else {
        return Plan::FullScan;
    };

    let mut best: Option<(&String, Vec<Value>)> = None;
    for (field, clause) in filter.clauses() {
        let Clause::Eq(value) = clause else { continue };
        if !schema.is_indexed(field) {
            continue;
        }
        let pks = index.lookup(field, value);
        let smaller = match &best {
            Some((_, current)) => pks.len() < current.len(),
            None => true,
        };
        if smaller {
            best = Some((field, pks));
        }
    }

    match best {
        Some((field, pks)) => Plan::IndexSeed {
            field: field.clone(),
            pks,
        },
        None => Plan::FullScan,
    }
}
