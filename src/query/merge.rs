//! Streaming k-way merge and reduction of sorted record streams

use crate::schema::{Measure, Record, Value};
use crate::storage::RecordStream;
use crate::Result;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

/// Record tagged with the index of the stream it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRecord {
    pub source: usize,
    pub record: Record,
}

struct MergeState {
    streams: Vec<RecordStream>,
    pending: Vec<Option<Record>>,
    exhausted: Vec<bool>,
}

/// Merge streams sorted by key into one stream sorted by key.
///
/// Equal keys come out in source order. The first error from any source ends
/// the merge.
pub fn merge_sorted(streams: Vec<RecordStream>) -> BoxStream<'static, Result<MergedRecord>> {
    let state = MergeState {
        pending: streams.iter().map(|_| None).collect(),
        exhausted: vec![false; streams.len()],
        streams,
    };
    stream::try_unfold(state, next_merged).boxed()
}

async fn next_merged(mut state: MergeState) -> Result<Option<(MergedRecord, MergeState)>> {
    for index in 0..state.streams.len() {
        if state.pending[index].is_some() || state.exhausted[index] {
            continue;
        }
        match state.streams[index].next().await {
            Some(record) => state.pending[index] = Some(record?),
            None => state.exhausted[index] = true,
        }
    }

    let mut best: Option<usize> = None;
    for (index, pending) in state.pending.iter().enumerate() {
        let Some(record) = pending else {
            continue;
        };
        let better = match best.and_then(|b| state.pending[b].as_ref()) {
            None => true,
            Some(current) => record.keys < current.keys,
        };
        if better {
            best = Some(index);
        }
    }

    let Some(source) = best else {
        return Ok(None);
    };
    let Some(record) = state.pending[source].take() else {
        return Ok(None);
    };
    Ok(Some((MergedRecord { source, record }, state)))
}

/// Position of each output measure among a source's measures
pub(crate) fn measure_positions(source: &[String], output: &[String]) -> Vec<Option<usize>> {
    output
        .iter()
        .map(|name| source.iter().position(|f| f == name))
        .collect()
}

/// Lay a record out with the output measures, `Null` where the source has none
fn expand(record: Record, positions: &[Option<usize>]) -> Record {
    let measures = positions
        .iter()
        .map(|p| {
            p.and_then(|i| record.measures.get(i).cloned())
                .unwrap_or(Value::Null)
        })
        .collect();
    Record::new(record.keys, measures)
}

/// Reorder measures of every record to the output layout
pub(crate) fn project_measures(input: RecordStream, positions: Vec<Option<usize>>) -> RecordStream {
    input
        .map(move |item| item.map(|record| expand(record, &positions)))
        .boxed()
}

struct ReduceState {
    input: BoxStream<'static, Result<MergedRecord>>,
    positions: Vec<Vec<Option<usize>>>,
    reducers: Vec<Measure>,
    current: Option<Record>,
}

/// Combine consecutive records with equal keys.
///
/// `positions[source]` maps output measures onto the measures of records from
/// `source`; `reducers` holds one reducer per output measure.
pub fn reduce_sorted(
    input: BoxStream<'static, Result<MergedRecord>>,
    positions: Vec<Vec<Option<usize>>>,
    reducers: Vec<Measure>,
) -> RecordStream {
    let state = ReduceState {
        input,
        positions,
        reducers,
        current: None,
    };
    stream::try_unfold(state, next_reduced).boxed()
}

async fn next_reduced(mut state: ReduceState) -> Result<Option<(Record, ReduceState)>> {
    loop {
        let Some(item) = state.input.next().await else {
            let last = state.current.take();
            return Ok(last.map(|record| (record, state)));
        };
        let MergedRecord { source, record } = item?;
        let row = match state.positions.get(source) {
            Some(positions) => expand(record, positions),
            None => record,
        };

        match state.current.take() {
            None => state.current = Some(row),
            Some(mut current) if current.keys == row.keys => {
                for ((acc, value), reducer) in current
                    .measures
                    .iter_mut()
                    .zip(&row.measures)
                    .zip(&state.reducers)
                {
                    reducer.reduce(acc, value);
                }
                state.current = Some(current);
            }
            Some(current) => {
                state.current = Some(row);
                return Ok(Some((current, state)));
            }
        }
    }
}
