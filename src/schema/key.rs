//! Multi-column primary keys

use super::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered tuple of key column values.
///
/// Ordering is lexicographic over the components; a strict prefix sorts before
/// any key it prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(Vec<Value>);

impl PrimaryKey {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    /// The zero-length key
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    /// Truncate to the first `size` components
    pub fn prefix(&self, size: usize) -> PrimaryKey {
        let size = size.min(self.0.len());
        Self(self.0[..size].to_vec())
    }

    /// Whether both keys agree on their first `size` components
    pub fn shares_prefix(&self, other: &PrimaryKey, size: usize) -> bool {
        let size = size.min(self.0.len()).min(other.0.len());
        self.0[..size] == other.0[..size]
    }
}

impl From<Vec<Value>> for PrimaryKey {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", value)?;
        }
        f.write_str("]")
    }
}

/// Build a [`PrimaryKey`] from heterogeneous literals: `key![1, "a"]`
#[macro_export]
macro_rules! key {
    ($($value:expr),* $(,)?) => {
        $crate::schema::PrimaryKey::new(vec![$($crate::schema::Value::from($value)),*])
    };
}
