//! Predicate algebra over key columns
//!
//! Predicates serve two purposes: they prune the chunk index (through
//! [`to_range_scan`]) and they filter rows read from chunks (through
//! [`RowFilter`]). Both start from [`Predicate::simplify`], which folds
//! constants, flattens nested conjunctions and combines sibling constraints on
//! the same column.

mod filter;
mod scan;
mod simplify;

pub use filter::RowFilter;
pub use scan::{to_range_scan, RangeScan};

use crate::schema::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Boolean expression over key columns
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Predicate {
    /// Matches everything
    True,
    /// Matches nothing
    False,
    /// column = value
    Eq(String, Value),
    /// column BETWEEN low AND high (inclusive)
    Between(String, Value, Value),
    /// Full match of the column's string form against a pattern
    Regexp(String, String),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

pub fn always_true() -> Predicate {
    Predicate::True
}

pub fn always_false() -> Predicate {
    Predicate::False
}

pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Predicate {
    Predicate::Eq(key.into(), value.into())
}

pub fn between(key: impl Into<String>, from: impl Into<Value>, to: impl Into<Value>) -> Predicate {
    Predicate::Between(key.into(), from.into(), to.into())
}

pub fn regexp(key: impl Into<String>, pattern: impl Into<String>) -> Predicate {
    Predicate::Regexp(key.into(), pattern.into())
}

pub fn not(predicate: Predicate) -> Predicate {
    Predicate::Not(Box::new(predicate))
}

pub fn and<I: IntoIterator<Item = Predicate>>(predicates: I) -> Predicate {
    Predicate::And(predicates.into_iter().collect())
}

pub fn or<I: IntoIterator<Item = Predicate>>(predicates: I) -> Predicate {
    Predicate::Or(predicates.into_iter().collect())
}

impl Predicate {
    pub fn is_always_true(&self) -> bool {
        matches!(self, Predicate::True)
    }

    pub fn is_always_false(&self) -> bool {
        matches!(self, Predicate::False)
    }

    /// Columns referenced anywhere in the expression
    pub fn dimensions(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_dimensions(&mut out);
        out
    }

    fn collect_dimensions(&self, out: &mut BTreeSet<String>) {
        match self {
            Predicate::True | Predicate::False => {}
            Predicate::Eq(key, _) | Predicate::Between(key, _, _) | Predicate::Regexp(key, _) => {
                out.insert(key.clone());
            }
            Predicate::Not(inner) => inner.collect_dimensions(out),
            Predicate::And(ps) | Predicate::Or(ps) => {
                for p in ps {
                    p.collect_dimensions(out);
                }
            }
        }
    }

    /// Columns pinned to a single value by top-level equality conjuncts
    pub fn fully_specified_dimensions(&self) -> BTreeMap<String, Value> {
        let simplified = self.simplify();
        let conjuncts = match &simplified {
            Predicate::And(ps) => ps.as_slice(),
            other => std::slice::from_ref(other),
        };
        conjuncts
            .iter()
            .filter_map(|p| match p {
                Predicate::Eq(key, value) => Some((key.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::True => f.write_str("TRUE"),
            Predicate::False => f.write_str("FALSE"),
            Predicate::Eq(key, value) => write!(f, "{}={}", key, value),
            Predicate::Between(key, from, to) => {
                write!(f, "{} BETWEEN {} AND {}", key, from, to)
            }
            Predicate::Regexp(key, pattern) => write!(f, "{} REGEXP '{}'", key, pattern),
            Predicate::Not(inner) => write!(f, "NOT ({})", inner),
            Predicate::And(ps) => write_joined(f, ps, " AND "),
            Predicate::Or(ps) => write_joined(f, ps, " OR "),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, ps: &[Predicate], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, p) in ps.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{}", p)?;
    }
    f.write_str(")")
}
