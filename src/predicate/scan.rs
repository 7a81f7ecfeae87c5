//! Range scans derived from predicates

use super::Predicate;
use crate::schema::PrimaryKey;
use std::fmt;

/// Primary-key prefix interval to read from the chunk index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeScan {
    /// The predicate matches nothing; no chunk needs to be read
    NoScan,
    /// Read chunks intersecting `[from, to]`, both of the same prefix length
    Scan { from: PrimaryKey, to: PrimaryKey },
}

impl RangeScan {
    /// Scan of every chunk (zero-length prefix)
    pub fn full() -> Self {
        RangeScan::Scan {
            from: PrimaryKey::empty(),
            to: PrimaryKey::empty(),
        }
    }

    pub fn is_no_scan(&self) -> bool {
        matches!(self, RangeScan::NoScan)
    }

    pub fn is_full_scan(&self) -> bool {
        matches!(self, RangeScan::Scan { from, .. } if from.is_empty())
    }

    /// Number of key columns bounded by the scan
    pub fn prefix_len(&self) -> usize {
        match self {
            RangeScan::NoScan => 0,
            RangeScan::Scan { from, .. } => from.len(),
        }
    }
}

impl fmt::Display for RangeScan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeScan::NoScan => f.write_str("no scan"),
            RangeScan::Scan { from, .. } if from.is_empty() => f.write_str("full scan"),
            RangeScan::Scan { from, to } => write!(f, "range scan {}..{}", from, to),
        }
    }
}

/// Derive the primary-key range a predicate confines reads to.
///
/// Key columns are walked in order: an equality pins the column and the walk
/// continues, a `Between` bounds the column and ends the walk, and a column
/// with neither ends the walk.
pub fn to_range_scan(predicate: &Predicate, key_columns: &[String]) -> RangeScan {
    let simplified = predicate.simplify();
    let conjuncts = match &simplified {
        Predicate::False => return RangeScan::NoScan,
        Predicate::True => &[][..],
        Predicate::And(ps) => ps.as_slice(),
        other => std::slice::from_ref(other),
    };

    let mut from = Vec::new();
    let mut to = Vec::new();
    for column in key_columns {
        let pinned = conjuncts.iter().find_map(|p| match p {
            Predicate::Eq(key, value) if key == column => Some(value),
            _ => None,
        });
        if let Some(value) = pinned {
            from.push(value.clone());
            to.push(value.clone());
            continue;
        }

        let bounded = conjuncts.iter().find_map(|p| match p {
            Predicate::Between(key, lo, hi) if key == column => Some((lo, hi)),
            _ => None,
        });
        if let Some((lo, hi)) = bounded {
            from.push(lo.clone());
            to.push(hi.clone());
        }
        break;
    }

    RangeScan::Scan {
        from: PrimaryKey::new(from),
        to: PrimaryKey::new(to),
    }
}
