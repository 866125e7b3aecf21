//! Order validation for `--check` and `--merge`

use crate::chunk::ChunkWriter;
use crate::compare::Comparator;
use crate::config::SortConfig;
use crate::error::SortResult;
use crate::external_sort::{ExternalSorter, SortedRuns};
use crate::extract::KeyExtractor;
use crate::key::DecoratedLine;
use crate::line_source::LineSource;
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

/// Why a line broke the expected order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    OutOfOrder,
    NotUnique,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::OutOfOrder => write!(f, "out of order"),
            ViolationKind::NotUnique => write!(f, "not unique"),
        }
    }
}

/// First offending line of an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderViolation {
    pub file: String,
    /// 1-based line number within `file`, headers included
    pub line: u64,
    pub kind: ViolationKind,
    pub text: String,
}

impl fmt::Display for OrderViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}: {}", self.file, self.line, self.kind, self.text)
    }
}

/// Outcome of a run that validates order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Disorder(OrderViolation),
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Success => crate::EXIT_SUCCESS,
            ExitStatus::Disorder(_) => crate::EXIT_FAILURE,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

/// Compares each line with its predecessor
pub struct OrderChecker {
    comparator: Comparator,
    unique: bool,
    previous: Option<DecoratedLine>,
}

impl OrderChecker {
    pub fn new(comparator: Comparator, unique: bool) -> Self {
        Self {
            comparator,
            unique,
            previous: None,
        }
    }

    /// Forget the previous line, e.g. at a file boundary
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Whether `line` may follow the previously accepted line
    pub fn check(&self, line: &DecoratedLine) -> Option<ViolationKind> {
        let previous = self.previous.as_ref()?;
        match self.comparator.compare(line, previous) {
            Ordering::Less => Some(ViolationKind::OutOfOrder),
            Ordering::Equal if self.unique => Some(ViolationKind::NotUnique),
            _ => None,
        }
    }

    pub fn accept(&mut self, line: DecoratedLine) {
        self.previous = Some(line);
    }
}

/// Validate every input file in turn, stopping at the first violation
pub fn check_order(
    config: &SortConfig,
    source: &mut LineSource,
    extractor: &KeyExtractor,
    comparator: Comparator,
) -> SortResult<ExitStatus> {
    let mut checker = OrderChecker::new(comparator, config.unique);
    let mut current_file = None;
    let mut checked = 0u64;

    while let Some(line) = source.next_line()? {
        if current_file != Some(line.file_index) {
            checker.reset();
            current_file = Some(line.file_index);
        }
        let decorated = extractor.decorate(line.sequence, line.text);
        if let Some(kind) = checker.check(&decorated) {
            let violation = OrderViolation {
                file: source.input_name(line.file_index),
                line: line.line_number,
                kind,
                text: decorated.line,
            };
            tracing::debug!(%violation, "order check failed");
            return Ok(ExitStatus::Disorder(violation));
        }
        checker.accept(decorated);
        checked += 1;
    }

    tracing::debug!(lines = checked, "input is in order");
    Ok(ExitStatus::Success)
}

/// Input of a merge after each file has been validated into its own chunk
pub enum MergeInput {
    Ready(SortedRuns),
    Rejected(OrderViolation),
}

/// Copy each file into a chunk while checking that it is already sorted.
///
/// A file out of order stops the merge before anything is written.
pub fn prepare_merge(
    source: &mut LineSource,
    extractor: &KeyExtractor,
    checker_comparator: Comparator,
    sorter: &mut ExternalSorter,
) -> SortResult<MergeInput> {
    let mut checker = OrderChecker::new(checker_comparator, false);
    let mut chunks = Vec::new();
    let mut writer = None;
    let mut current_file = None;

    while let Some(line) = source.next_line()? {
        if current_file != Some(line.file_index) {
            if let Some(done) = writer.take() {
                chunks.push(finish_chunk(done)?);
            }
            writer = Some(sorter.create_chunk()?);
            checker.reset();
            current_file = Some(line.file_index);
        }
        let decorated = extractor.decorate(line.sequence, line.text);
        if let Some(kind) = checker.check(&decorated) {
            return Ok(MergeInput::Rejected(OrderViolation {
                file: source.input_name(line.file_index),
                line: line.line_number,
                kind,
                text: decorated.line,
            }));
        }
        if let Some(chunk) = writer.as_mut() {
            chunk.write_line(&decorated)?;
        }
        checker.accept(decorated);
    }
    if let Some(done) = writer.take() {
        chunks.push(finish_chunk(done)?);
    }

    tracing::debug!(files = chunks.len(), "validated merge inputs");
    Ok(MergeInput::Ready(SortedRuns::Chunks(chunks)))
}

fn finish_chunk(writer: ChunkWriter) -> SortResult<PathBuf> {
    let path = writer.path().to_path_buf();
    writer.finish()?;
    Ok(path)
}
