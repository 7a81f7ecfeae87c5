//! Generic row representation

use super::{PrimaryKey, Value};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One row: key column values followed by measure values.
///
/// A record carries no names; its columns are interpreted through a
/// [`RecordLayout`] resolved once per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub keys: Vec<Value>,
    pub measures: Vec<Value>,
}

impl Record {
    pub fn new(keys: Vec<Value>, measures: Vec<Value>) -> Self {
        Self { keys, measures }
    }

    /// Primary key of this record
    pub fn key(&self) -> PrimaryKey {
        PrimaryKey::new(self.keys.clone())
    }

    /// Key values picked by position
    pub fn project_key(&self, positions: &[usize]) -> PrimaryKey {
        PrimaryKey::new(positions.iter().map(|&i| self.keys[i].clone()).collect())
    }
}

/// Build a [`Record`]: `record!([1, "a"], [5])`
#[macro_export]
macro_rules! record {
    ([$($key:expr),* $(,)?], [$($measure:expr),* $(,)?]) => {
        $crate::schema::Record::new(
            vec![$($crate::schema::Value::from($key)),*],
            vec![$($crate::schema::Value::from($measure)),*],
        )
    };
}

/// Column names of a record stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    pub keys: Vec<String>,
    pub measures: Vec<String>,
}

impl RecordLayout {
    pub fn new<K, M>(keys: K, measures: M) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
        M: IntoIterator,
        M::Item: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            measures: measures.into_iter().map(Into::into).collect(),
        }
    }

    pub fn key_position(&self, name: &str) -> Option<usize> {
        self.keys.iter().position(|k| k == name)
    }

    pub fn measure_position(&self, name: &str) -> Option<usize> {
        self.measures.iter().position(|m| m == name)
    }

    /// Positions of `names` among this layout's keys
    pub fn key_positions(&self, names: &[String]) -> Result<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.key_position(name)
                    .ok_or_else(|| Error::Config(format!("unknown key column '{}'", name)))
            })
            .collect()
    }

    /// Check that a record has the column count this layout describes
    pub fn check(&self, record: &Record) -> Result<()> {
        if record.keys.len() != self.keys.len() || record.measures.len() != self.measures.len() {
            return Err(Error::InvalidSchema(format!(
                "record has {} keys and {} measures, layout expects {} and {}",
                record.keys.len(),
                record.measures.len(),
                self.keys.len(),
                self.measures.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_key() {
        let record = crate::record!([1, "b", 3], [10]);
        assert_eq!(record.project_key(&[1, 0]), crate::key!["b", 1]);
    }

    #[test]
    fn test_layout_positions() {
        let layout = RecordLayout::new(["day", "hour"], ["clicks"]);
        assert_eq!(layout.key_positions(&["hour".to_string()]).unwrap(), vec![1]);
        assert!(layout.key_positions(&["minute".to_string()]).is_err());
        assert_eq!(layout.measure_position("clicks"), Some(0));
    }

    #[test]
    fn test_layout_check() {
        let layout = RecordLayout::new(["day"], ["clicks"]);
        assert!(layout.check(&crate::record!([1], [2])).is_ok());
        assert!(layout.check(&crate::record!([1, 2], [2])).is_err());
    }
}
