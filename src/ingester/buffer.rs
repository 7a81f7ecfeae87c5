//! Group-by accumulation for the write path

use crate::schema::{Measure, PrimaryKey, Record, Value};
use std::collections::HashMap;

/// Accumulates rows by key until a batch is full.
///
/// Input rows are laid out as the caller's layout; output rows carry the
/// aggregation keys in key-column order followed by one accumulator per stored
/// measure.
#[derive(Debug)]
pub struct GroupReducer {
    /// Input key position for every aggregation key column
    key_positions: Vec<usize>,
    /// Input measure position for every stored measure
    measure_positions: Vec<usize>,
    reducers: Vec<Measure>,
    groups: HashMap<PrimaryKey, Vec<Value>>,
    capacity: usize,
}

impl GroupReducer {
    pub fn new(
        key_positions: Vec<usize>,
        measure_positions: Vec<usize>,
        reducers: Vec<Measure>,
        capacity: usize,
    ) -> Self {
        Self {
            key_positions,
            measure_positions,
            reducers,
            groups: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Fold a row in; returns the sorted batch once `capacity` keys are held
    pub fn push(&mut self, record: &Record) -> Option<Vec<Record>> {
        let key = record.project_key(&self.key_positions);
        let inputs = self.measure_positions.iter().map(|&i| &record.measures[i]);
        match self.groups.get_mut(&key) {
            Some(accumulators) => {
                for ((acc, input), reducer) in accumulators.iter_mut().zip(inputs).zip(&self.reducers) {
                    reducer.accumulate(acc, input);
                }
            }
            None => {
                let accumulators = inputs
                    .zip(&self.reducers)
                    .map(|(input, reducer)| reducer.init(input))
                    .collect();
                self.groups.insert(key, accumulators);
            }
        }

        if self.groups.len() >= self.capacity {
            Some(self.take())
        } else {
            None
        }
    }

    /// Drain every group as records sorted by key
    pub fn take(&mut self) -> Vec<Record> {
        let mut groups: Vec<(PrimaryKey, Vec<Value>)> = self.groups.drain().collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups
            .into_iter()
            .map(|(key, measures)| Record::new(key.into_values(), measures))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
