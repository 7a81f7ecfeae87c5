//! Query planning and execution
//!
//! A query names the keys to group by, the measures to return and a predicate
//! over key columns. Execution runs in three steps:
//! - the catalog prunes chunks with the predicate's range scan
//! - [`create_plan`] splits the chunks into sorted, non-overlapping sequences
//! - the [`QueryEngine`] streams every sequence and merges them, reducing rows
//!   with equal keys

mod engine;
mod merge;
mod plan;
mod sort;

pub use engine::QueryEngine;
pub use merge::{merge_sorted, reduce_sorted, MergedRecord};
pub use plan::{create_plan, QueryPlan, Sequence};
pub use sort::ExternalSorter;

use crate::predicate::{always_true, Predicate};
use crate::schema::RecordLayout;

/// Grouping query over an aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationQuery {
    /// Key columns to group by, in output order
    pub keys: Vec<String>,
    /// Measures to return, in output order
    pub measures: Vec<String>,
    /// Filter over key columns
    pub predicate: Predicate,
}

impl Default for AggregationQuery {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            measures: Vec::new(),
            predicate: always_true(),
        }
    }
}

impl AggregationQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I>(mut self, keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_measures<I>(mut self, measures: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.measures = measures.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Layout of the rows this query returns
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::new(self.keys.iter().cloned(), self.measures.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::eq;

    #[test]
    fn test_query_builder() {
        let query = AggregationQuery::new()
            .with_keys(["day"])
            .with_measures(["clicks", "cost"])
            .with_predicate(eq("day", 1));
        assert_eq!(query.layout(), RecordLayout::new(["day"], ["clicks", "cost"]));
        assert_eq!(query.predicate, eq("day", 1));
        assert!(AggregationQuery::new().predicate.is_always_true());
    }
}
