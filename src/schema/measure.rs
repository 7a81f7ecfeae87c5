//! Measure reducers

use super::{FieldType, Value};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reduction applied to a measure column.
///
/// Every reducer works in two phases: `init`/`accumulate` fold raw input values
/// into an accumulator during ingestion, and `reduce` combines two accumulators
/// when chunks are merged or queried. `Value::Null` is the identity of both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Measure {
    Sum,
    Min,
    Max,
    Count,
}

impl Measure {
    /// Accumulator type produced for an input column of `input` type
    pub fn accumulator_type(&self, input: FieldType) -> FieldType {
        match self {
            Measure::Count => FieldType::Int,
            _ => input,
        }
    }

    /// Start an accumulator from the first raw input value
    pub fn init(&self, input: &Value) -> Value {
        match self {
            Measure::Count => Value::Int(if input.is_null() { 0 } else { 1 }),
            _ => input.clone(),
        }
    }

    /// Fold another raw input value into an accumulator
    pub fn accumulate(&self, acc: &mut Value, input: &Value) {
        let next = self.init(input);
        self.reduce(acc, &next);
    }

    /// Combine two accumulators
    pub fn reduce(&self, acc: &mut Value, other: &Value) {
        if other.is_null() {
            return;
        }
        if acc.is_null() {
            *acc = other.clone();
            return;
        }
        match self {
            Measure::Sum | Measure::Count => *acc = add(acc, other),
            Measure::Min => {
                if other < acc {
                    *acc = other.clone();
                }
            }
            Measure::Max => {
                if other > acc {
                    *acc = other.clone();
                }
            }
        }
    }
}

fn add(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
        (Value::Float(x), Value::Float(y)) => Value::Float(OrderedFloat(x.0 + y.0)),
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
            Value::Float(OrderedFloat(*x as f64 + y.0))
        }
        // Non-numeric sums keep the first value seen.
        _ => a.clone(),
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Measure::Sum => "sum",
            Measure::Min => "min",
            Measure::Max => "max",
            Measure::Count => "count",
        };
        f.write_str(name)
    }
}
