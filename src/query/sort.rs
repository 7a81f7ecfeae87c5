//! External sort of record streams

use super::merge::merge_sorted;
use crate::schema::Record;
use crate::storage::RecordStream;
use crate::{Error, Result};
use futures::stream;
use futures::{StreamExt, TryStreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::debug;

/// Sorts record streams by key, spilling sorted runs to disk
#[derive(Debug, Clone)]
pub struct ExternalSorter {
    items_in_memory: usize,
    block_size: usize,
    sort_dir: Option<PathBuf>,
}

impl ExternalSorter {
    pub fn new(items_in_memory: usize, block_size: usize, sort_dir: Option<PathBuf>) -> Self {
        Self {
            items_in_memory: items_in_memory.max(1),
            block_size: block_size.max(1),
            sort_dir,
        }
    }

    /// Sort `input` by record keys.
    ///
    /// The input is consumed before the returned stream yields anything. Input
    /// that fits in memory is sorted in place; larger input is written out as
    /// sorted runs which are merged while the result is read.
    pub async fn sort(&self, mut input: RecordStream) -> Result<RecordStream> {
        let mut buffer: Vec<Record> = Vec::new();
        let mut spill_dir: Option<Arc<TempDir>> = None;
        let mut runs: Vec<PathBuf> = Vec::new();

        while let Some(record) = input.next().await {
            buffer.push(record?);
            if buffer.len() >= self.items_in_memory {
                if spill_dir.is_none() {
                    spill_dir = Some(Arc::new(self.temp_dir()?));
                }
                if let Some(dir) = &spill_dir {
                    let path = dir.path().join(format!("run-{}.jsonl", runs.len()));
                    self.write_run(&path, std::mem::take(&mut buffer)).await?;
                    runs.push(path);
                }
            }
        }

        sort_records(&mut buffer);
        let Some(dir) = spill_dir else {
            return Ok(stream::iter(buffer.into_iter().map(Ok)).boxed());
        };

        debug!(runs = runs.len(), in_memory = buffer.len(), "Merging sorted runs");
        let mut sources = Vec::with_capacity(runs.len() + 1);
        for path in &runs {
            sources.push(read_run(path, dir.clone()).await?);
        }
        sources.push(stream::iter(buffer.into_iter().map(Ok)).boxed());
        Ok(merge_sorted(sources).map_ok(|merged| merged.record).boxed())
    }

    fn temp_dir(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("rollupdb-sort-");
        let dir = match &self.sort_dir {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        Ok(dir)
    }

    async fn write_run(&self, path: &Path, mut records: Vec<Record>) -> Result<()> {
        sort_records(&mut records);
        let file = File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.block_size, file);
        for record in &records {
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }
        writer.flush().await?;
        debug!(path = %path.display(), records = records.len(), "Spilled sorted run");
        Ok(())
    }
}

fn sort_records(records: &mut [Record]) {
    records.sort_by(|a, b| a.keys.cmp(&b.keys));
}

/// Stream a spilled run back. The directory handle keeps the run on disk until
/// every reader is dropped.
async fn read_run(path: &Path, dir: Arc<TempDir>) -> Result<RecordStream> {
    let file = File::open(path).await?;
    let lines = BufReader::new(file).lines();
    let records = stream::try_unfold((lines, dir), |(mut lines, dir)| async move {
        match lines.next_line().await? {
            Some(line) => {
                let record: Record = serde_json::from_str(&line)?;
                Ok::<_, Error>(Some((record, (lines, dir))))
            }
            None => Ok(None),
        }
    });
    Ok(records.boxed())
}
