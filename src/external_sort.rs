//! External merge sort: sorted spills to temporary chunks, then k-way merges
//!
//! Input is read in batches of at most `chunk_line_bound` lines. A run whose
//! whole input fits in one batch never touches the disk. Otherwise each batch
//! is sorted and written to its own chunk, and the chunks are merged at most
//! `batch_size` at a time until a single final merge feeds the output.

use crate::chunk::{ChunkFormat, ChunkReader, ChunkWriter};
use crate::compare::Comparator;
use crate::config::SortConfig;
use crate::error::{SortContext, SortResult};
use crate::extract::KeyExtractor;
use crate::key::DecoratedLine;
use crate::line_source::LineSource;
use crate::output::LineSink;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Sorted input, either still in memory or spilled to chunks
#[derive(Debug)]
pub enum SortedRuns {
    InMemory(Vec<DecoratedLine>),
    Chunks(Vec<PathBuf>),
}

/// Owns the temporary directory of one run; dropping it removes every chunk
pub struct ExternalSorter {
    comparator: Comparator,
    format: ChunkFormat,
    chunk_lines: usize,
    fan_in: usize,
    temp_dir: TempDir,
    chunks_created: usize,
}

impl ExternalSorter {
    pub fn new(config: &SortConfig, comparator: Comparator) -> SortResult<Self> {
        if let Some(threads) = config.parallel {
            tracing::warn!(threads, "parallel sorting is not supported; running single-threaded");
        }

        let base = config.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
        let temp_dir = tempfile::Builder::new()
            .prefix("sort")
            .tempdir_in(&base)
            .with_file_context(&base.display().to_string())?;
        tracing::debug!(dir = %temp_dir.path().display(), "created temporary directory");

        Ok(Self {
            comparator,
            format: ChunkFormat::from_config(config),
            chunk_lines: config.chunk_line_bound().max(1),
            fan_in: config.batch_size.max(2),
            temp_dir,
            chunks_created: 0,
        })
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Start a new chunk file inside the temporary directory
    pub fn create_chunk(&mut self) -> SortResult<ChunkWriter> {
        self.chunks_created += 1;
        let path = self
            .temp_path()
            .join(format!("chunk{:06}", self.chunks_created));
        self.format.create(&path)
    }

    /// Read, decorate and sort all input, spilling once it outgrows one batch
    pub fn sort_input(
        &mut self,
        source: &mut LineSource,
        extractor: &KeyExtractor,
    ) -> SortResult<SortedRuns> {
        let mut chunks = Vec::new();
        let mut batch = Vec::with_capacity(self.chunk_lines.min(64 * 1024));

        while let Some(line) = source.next_line()? {
            batch.push(extractor.decorate(line.sequence, line.text));
            if batch.len() >= self.chunk_lines {
                chunks.push(self.spill(&mut batch)?);
            }
        }

        if chunks.is_empty() {
            self.sort_batch(&mut batch);
            tracing::debug!(lines = batch.len(), "sorted input in memory");
            return Ok(SortedRuns::InMemory(batch));
        }
        if !batch.is_empty() {
            chunks.push(self.spill(&mut batch)?);
        }
        Ok(SortedRuns::Chunks(chunks))
    }

    fn sort_batch(&self, batch: &mut [DecoratedLine]) {
        batch.sort_by(|a, b| self.comparator.compare(a, b));
    }

    fn spill(&mut self, batch: &mut Vec<DecoratedLine>) -> SortResult<PathBuf> {
        self.sort_batch(batch);
        let bytes: usize = batch.iter().map(DecoratedLine::approximate_size).sum();
        let mut writer = self.create_chunk()?;
        for line in batch.iter() {
            writer.write_line(line)?;
        }
        let path = writer.path().to_path_buf();
        let lines = writer.finish()?;
        batch.clear();
        tracing::debug!(chunk = %path.display(), lines, bytes, "spilled sorted chunk");
        Ok(path)
    }

    /// Deliver sorted runs to `sink`, merging chunks in as many passes as needed
    pub fn merge_into<S: LineSink>(&mut self, runs: SortedRuns, sink: &mut S) -> SortResult<()> {
        let mut chunks = match runs {
            SortedRuns::InMemory(lines) => {
                for line in lines {
                    sink.accept(line)?;
                }
                return Ok(());
            }
            SortedRuns::Chunks(chunks) => chunks,
        };

        let mut pass = 0;
        while chunks.len() > self.fan_in {
            pass += 1;
            let mut merged = Vec::with_capacity(chunks.len().div_ceil(self.fan_in));
            for group in chunks.chunks(self.fan_in) {
                let mut writer = self.create_chunk()?;
                self.merge_chunks(group, &mut writer)?;
                merged.push(writer.path().to_path_buf());
                writer.finish()?;
                for path in group {
                    fs::remove_file(path).with_file_context(&path.display().to_string())?;
                }
            }
            tracing::debug!(pass, inputs = chunks.len(), outputs = merged.len(), "merge pass");
            chunks = merged;
        }

        tracing::debug!(inputs = chunks.len(), "final merge");
        self.merge_chunks(&chunks, sink)
    }

    fn merge_chunks<S: LineSink>(&self, paths: &[PathBuf], sink: &mut S) -> SortResult<()> {
        let readers = paths
            .iter()
            .map(|path| self.format.open(path))
            .collect::<SortResult<Vec<_>>>()?;
        let mut merger = ChunkMerger::new(readers, &self.comparator)?;
        while let Some(line) = merger.next_line()? {
            sink.accept(line)?;
        }
        Ok(())
    }
}

impl LineSink for ChunkWriter {
    fn accept(&mut self, line: DecoratedLine) -> SortResult<()> {
        self.write_line(&line)
    }
}

/// Lazily merges sorted chunk readers into one sorted sequence
pub struct ChunkMerger<'a> {
    readers: Vec<ChunkReader>,
    heap: BinaryHeap<HeapEntry<'a>>,
}

impl<'a> ChunkMerger<'a> {
    pub fn new(mut readers: Vec<ChunkReader>, comparator: &'a Comparator) -> SortResult<Self> {
        let mut heap = BinaryHeap::with_capacity(readers.len());
        for (source, reader) in readers.iter_mut().enumerate() {
            if let Some(line) = reader.next_line()? {
                heap.push(HeapEntry {
                    line,
                    source,
                    comparator,
                });
            }
        }
        Ok(Self { readers, heap })
    }

    pub fn next_line(&mut self) -> SortResult<Option<DecoratedLine>> {
        let Some(entry) = self.heap.pop() else {
            return Ok(None);
        };
        if let Some(line) = self.readers[entry.source].next_line()? {
            self.heap.push(HeapEntry {
                line,
                source: entry.source,
                comparator: entry.comparator,
            });
        }
        Ok(Some(entry.line))
    }
}

struct HeapEntry<'a> {
    line: DecoratedLine,
    source: usize,
    comparator: &'a Comparator,
}

impl PartialEq for HeapEntry<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry<'_> {}

impl PartialOrd for HeapEntry<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap; equal lines leave the earlier chunk first
        self.comparator
            .compare(&other.line, &self.line)
            .then_with(|| other.source.cmp(&self.source))
    }
}
