//! Schema definitions for RollupDB aggregations
//!
//! An aggregation is described by its ordered key columns (which define the
//! primary key and the sort order of every chunk), its measures (columns
//! combined with a reducer when keys collide), and a partitioning key: a key
//! prefix that splits chunks into independent consolidation domains.

mod key;
mod measure;
mod record;
mod value;

pub use key::PrimaryKey;
pub use measure::Measure;
pub use record::{Record, RecordLayout};
pub use value::{FieldType, Value};

use crate::{Error, Result};

/// Key column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: String,
    pub field_type: FieldType,
}

/// Measure column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureColumn {
    pub name: String,
    pub field_type: FieldType,
    pub measure: Measure,
}

/// Shape of an aggregation: keys, measures and partitioning key
#[derive(Debug, Clone, Default)]
pub struct AggregationStructure {
    keys: Vec<KeyColumn>,
    measures: Vec<MeasureColumn>,
    partitioning_key: Vec<String>,
}

impl AggregationStructure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key column
    pub fn with_key(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.keys.push(KeyColumn {
            name: name.into(),
            field_type,
        });
        self
    }

    /// Append a measure column
    pub fn with_measure(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        measure: Measure,
    ) -> Self {
        self.measures.push(MeasureColumn {
            name: name.into(),
            field_type,
            measure,
        });
        self
    }

    /// Set the partitioning key; must be a prefix of the key columns
    pub fn with_partitioning_key<I>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let is_prefix = names.len() <= self.keys.len()
            && names.iter().zip(&self.keys).all(|(name, key)| *name == key.name);
        if !is_prefix {
            return Err(Error::Config(format!(
                "partitioning key {:?} is not a prefix of keys {:?}",
                names,
                self.key_names()
            )));
        }
        self.partitioning_key = names;
        Ok(self)
    }

    pub fn keys(&self) -> &[KeyColumn] {
        &self.keys
    }

    pub fn key_names(&self) -> Vec<String> {
        self.keys.iter().map(|k| k.name.clone()).collect()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn key_type(&self, name: &str) -> Option<FieldType> {
        self.keys.iter().find(|k| k.name == name).map(|k| k.field_type)
    }

    pub fn measures(&self) -> &[MeasureColumn] {
        &self.measures
    }

    pub fn measure_names(&self) -> Vec<String> {
        self.measures.iter().map(|m| m.name.clone()).collect()
    }

    pub fn measure(&self, name: &str) -> Option<&MeasureColumn> {
        self.measures.iter().find(|m| m.name == name)
    }

    pub fn partitioning_key(&self) -> &[String] {
        &self.partitioning_key
    }

    pub fn partitioning_key_len(&self) -> usize {
        self.partitioning_key.len()
    }

    /// Reducers for `names`, failing on unknown measures
    pub fn reducers(&self, names: &[String]) -> Result<Vec<Measure>> {
        names
            .iter()
            .map(|name| {
                self.measure(name)
                    .map(|m| m.measure)
                    .ok_or_else(|| Error::Config(format!("unknown measure '{}'", name)))
            })
            .collect()
    }

    /// Keep the structure's measures present in `fields`, in structure order
    pub fn measures_in<'a, I>(&self, fields: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let present: std::collections::HashSet<&String> = fields.into_iter().collect();
        self.measures
            .iter()
            .filter(|m| present.contains(&m.name))
            .map(|m| m.name.clone())
            .collect()
    }

    /// Layout of rows stored in chunks with the given measures
    pub fn chunk_layout(&self, measures: &[String]) -> RecordLayout {
        RecordLayout::new(self.key_names(), measures.iter().cloned())
    }
}
