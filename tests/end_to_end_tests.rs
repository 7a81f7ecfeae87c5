//! End-to-end integration tests
//!
//! Exercises the public API the way an embedding process would:
//! - ingestion into chunks and catalog diffs
//! - queries with predicates, key prefixes and reordered keys
//! - object store backed chunk storage

use futures::{stream, StreamExt, TryStreamExt};
use object_store::memory::InMemory;
use rollupdb::predicate::{and, between, eq, regexp};
use rollupdb::prelude::*;
use rollupdb::{key, record};
use std::collections::BTreeMap;
use std::sync::Arc;

fn structure() -> AggregationStructure {
    AggregationStructure::new()
        .with_key("day", FieldType::Int)
        .with_key("site", FieldType::Str)
        .with_measure("clicks", FieldType::Int, Measure::Sum)
        .with_measure("cost", FieldType::Float, Measure::Max)
        .with_partitioning_key(["day"])
        .unwrap()
}

fn config(chunk_size: usize) -> AggregationConfig {
    AggregationConfig {
        chunk_size,
        ..AggregationConfig::default()
    }
}

fn rows(records: Vec<Record>) -> RecordStream {
    stream::iter(records.into_iter().map(Ok)).boxed()
}

/// Deterministic input rows for days 0..5 and four sites
fn generate(count: i64, offset: i64) -> Vec<Record> {
    let sites = ["alpha", "beta", "gamma", "delta"];
    (offset..offset + count)
        .map(|i| {
            let site = sites[((i * 7) % 4) as usize];
            record!([i % 5, site], [i % 10, (i % 13) as f64 * 0.5])
        })
        .collect()
}

/// Expected result of grouping `input` by (day, site)
fn expected(input: &[Record]) -> Vec<Record> {
    let mut groups: BTreeMap<Vec<Value>, (i64, f64)> = BTreeMap::new();
    for row in input {
        let clicks = row.measures[0].as_i64().unwrap();
        let cost = row.measures[1].as_f64().unwrap();
        let entry = groups.entry(row.keys.clone()).or_insert((0, f64::MIN));
        entry.0 += clicks;
        entry.1 = entry.1.max(cost);
    }
    groups
        .into_iter()
        .map(|(keys, (clicks, cost))| Record::new(keys, vec![clicks.into(), cost.into()]))
        .collect()
}

fn full_query() -> AggregationQuery {
    AggregationQuery::new()
        .with_keys(["day", "site"])
        .with_measures(["clicks", "cost"])
}

async fn collect(aggregation: &Aggregation, query: &AggregationQuery) -> Vec<Record> {
    aggregation
        .query(query)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap()
}

async fn ingest(aggregation: &mut Aggregation, input: Vec<Record>) -> AggregationDiff {
    let layout = RecordLayout::new(["day", "site"], ["clicks", "cost"]);
    let diff = aggregation.consume(&layout, rows(input)).await.unwrap();
    aggregation.apply_diff(&diff).unwrap();
    diff
}

#[tokio::test]
async fn test_group_reduce_then_single_chunk() {
    let structure = AggregationStructure::new()
        .with_key("day", FieldType::Int)
        .with_measure("clicks", FieldType::Int, Measure::Sum);
    let mut aggregation =
        Aggregation::new(structure, Arc::new(MemoryChunkStorage::new()), config(2)).unwrap();

    let diff = aggregation
        .consume(
            &RecordLayout::new(["day"], ["clicks"]),
            rows(vec![record!([1], [5]), record!([1], [3]), record!([2], [1])]),
        )
        .await
        .unwrap();
    assert_eq!(diff.added.len(), 1);
    let chunk = diff.added.iter().next().unwrap();
    assert_eq!((chunk.min_key.clone(), chunk.max_key.clone(), chunk.count), (key![1], key![2], 2));

    aggregation.apply_diff(&diff).unwrap();
    let query = AggregationQuery::new().with_keys(["day"]).with_measures(["clicks"]);
    assert_eq!(
        collect(&aggregation, &query).await,
        vec![record!([1], [8]), record!([2], [1])]
    );
}

#[tokio::test]
async fn test_multiple_ingestions_merge_on_read() {
    let mut aggregation =
        Aggregation::new(structure(), Arc::new(MemoryChunkStorage::new()), config(4)).unwrap();
    let first = generate(120, 0);
    let second = generate(90, 1000);
    ingest(&mut aggregation, first.clone()).await;
    ingest(&mut aggregation, second.clone()).await;

    assert!(aggregation.catalog().chunks().all(|c| c.is_partitioned(1)));
    assert!(aggregation.catalog().chunks().all(|c| c.count <= 4));

    let all: Vec<Record> = first.into_iter().chain(second).collect();
    assert_eq!(collect(&aggregation, &full_query()).await, expected(&all));
}

#[tokio::test]
async fn test_predicates_prune_chunks_and_rows() {
    let mut aggregation =
        Aggregation::new(structure(), Arc::new(MemoryChunkStorage::new()), config(4)).unwrap();
    let input = generate(100, 0);
    ingest(&mut aggregation, input.clone()).await;

    let day_two = full_query().with_predicate(eq("day", 2));
    let cost_all = aggregation.estimate_cost(&full_query()).unwrap();
    let cost_day_two = aggregation.estimate_cost(&day_two).unwrap();
    assert!(cost_day_two < cost_all);

    let want: Vec<Record> = expected(&input)
        .into_iter()
        .filter(|r| r.keys[0] == Value::Int(2))
        .collect();
    assert_eq!(collect(&aggregation, &day_two).await, want);

    let filtered = full_query().with_predicate(and([between("day", 1, 3), regexp("site", "(alpha|beta)")]));
    let want: Vec<Record> = expected(&input)
        .into_iter()
        .filter(|r| {
            let day = r.keys[0].as_i64().unwrap();
            let site = r.keys[1].as_str().unwrap();
            (1..=3).contains(&day) && (site == "alpha" || site == "beta")
        })
        .collect();
    assert_eq!(collect(&aggregation, &filtered).await, want);

    let nothing = full_query().with_predicate(and([eq("day", 1), eq("day", 2)]));
    assert_eq!(aggregation.estimate_cost(&nothing).unwrap(), 0);
    assert!(collect(&aggregation, &nothing).await.is_empty());
}

#[tokio::test]
async fn test_key_subsets_and_reordering() {
    let mut aggregation =
        Aggregation::new(structure(), Arc::new(MemoryChunkStorage::new()), config(3)).unwrap();
    let input = generate(60, 0);
    ingest(&mut aggregation, input.clone()).await;

    let mut by_site: BTreeMap<String, i64> = BTreeMap::new();
    for row in &input {
        *by_site.entry(row.keys[1].as_str().unwrap().to_string()).or_default() +=
            row.measures[0].as_i64().unwrap();
    }
    let query = AggregationQuery::new().with_keys(["site"]).with_measures(["clicks"]);
    let want: Vec<Record> = by_site
        .into_iter()
        .map(|(site, clicks)| record!([site], [clicks]))
        .collect();
    assert_eq!(collect(&aggregation, &query).await, want);

    let reordered = AggregationQuery::new()
        .with_keys(["site", "day"])
        .with_measures(["clicks"]);
    let rows = collect(&aggregation, &reordered).await;
    assert_eq!(rows.len(), expected(&input).len());
    assert!(rows.windows(2).all(|w| w[0].keys < w[1].keys));
}

#[tokio::test]
async fn test_object_store_backend() {
    let store = Arc::new(InMemory::new());
    let storage = Arc::new(ObjectStoreChunkStorage::open(store.clone(), "clicks").await.unwrap());
    let mut aggregation = Aggregation::new(structure(), storage, config(8)).unwrap();
    let input = generate(50, 0);
    let diff = ingest(&mut aggregation, input.clone()).await;
    assert_eq!(collect(&aggregation, &full_query()).await, expected(&input));

    let reopened = ObjectStoreChunkStorage::open(store, "clicks").await.unwrap();
    assert_eq!(reopened.list_chunks().await.unwrap(), diff.added_ids());
}

#[tokio::test]
async fn test_partial_measures_fill_nulls() {
    let mut aggregation =
        Aggregation::new(structure(), Arc::new(MemoryChunkStorage::new()), config(10)).unwrap();
    let clicks_only = aggregation
        .consume(
            &RecordLayout::new(["site", "day"], ["clicks"]),
            rows(vec![record!(["alpha", 1], [4])]),
        )
        .await
        .unwrap();
    aggregation.apply_diff(&clicks_only).unwrap();

    assert_eq!(
        collect(&aggregation, &full_query()).await,
        vec![Record::new(
            vec![1.into(), "alpha".into()],
            vec![4.into(), Value::Null]
        )]
    );

    let cost_only = AggregationQuery::new().with_keys(["day"]).with_measures(["cost"]);
    assert_eq!(aggregation.estimate_cost(&cost_only).unwrap(), 0);
    assert!(collect(&aggregation, &cost_only).await.is_empty());
}

#[tokio::test]
async fn test_plan_is_explainable() {
    let mut aggregation =
        Aggregation::new(structure(), Arc::new(MemoryChunkStorage::new()), config(100)).unwrap();
    ingest(&mut aggregation, generate(10, 0)).await;
    ingest(&mut aggregation, generate(10, 0)).await;

    let plan = aggregation.plan(&full_query().with_predicate(eq("day", 0))).unwrap();
    assert_eq!(plan.sequences.len(), 2);
    assert!(plan.to_string().starts_with("plan: 2 sequences"));
}
