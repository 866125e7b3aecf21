//! GNU sort compatible external sorting engine
//!
//! Lines are decorated with typed keys ([`extract`]), ordered by a multi-key
//! [`compare::Comparator`], spilled to temporary chunks when they outgrow
//! memory ([`external_sort`]) and merged back into the output. The same
//! machinery drives `--merge` and `--check` ([`validate`]).

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]

pub mod chunk;
pub mod compare;
pub mod config;
pub mod error;
pub mod external_sort;
pub mod extract;
pub mod key;
pub mod line_source;
pub mod locale;
pub mod output;
pub mod validate;

pub use config::{ProcessKind, SortConfig, SortConfigBuilder};
pub use error::{SortError, SortResult};
pub use validate::{ExitStatus, OrderViolation, ViolationKind};

use compare::Comparator;
use external_sort::ExternalSorter;
use extract::KeyExtractor;
use line_source::LineSource;
use locale::LocaleData;
use output::{Destination, OutputWriter};
use std::io::Write;
use validate::MergeInput;

/// Exit codes matching GNU sort
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const SORT_FAILURE: i32 = 2;

/// Locale and key extraction shared by every mode
fn prepare(config: &SortConfig) -> SortResult<(LocaleData, KeyExtractor)> {
    config.validate()?;
    let locale = LocaleData::resolve(
        &config.text_locale,
        &config.number_locale,
        config.lenient_number_separators,
    )?;
    tracing::debug!(
        process = ?config.process,
        keys = %config
            .keys
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" "),
        stable = config.stable,
        unique = config.unique,
        chunk_lines = config.chunk_line_bound(),
        "resolved configuration"
    );
    if config.debug {
        for warning in config.diagnostics() {
            tracing::warn!("{warning}");
        }
    }
    let extractor = KeyExtractor::new(config, &locale)?;
    Ok((locale, extractor))
}

/// Sort the configured inputs into the configured output
pub fn sort(config: &SortConfig) -> SortResult<()> {
    let destination = Destination::from_config(config);
    sort_with(config, &destination.name(), || destination.open())
}

/// Sort the configured inputs into `writer`
pub fn sort_into<W: Write>(config: &SortConfig, writer: W) -> SortResult<()> {
    sort_with(config, "-", move || Ok(writer))
}

// The output is opened only after all input is read, so it may name an input.
fn sort_with<W, F>(config: &SortConfig, name: &str, open: F) -> SortResult<()>
where
    W: Write,
    F: FnOnce() -> SortResult<W>,
{
    let (locale, extractor) = prepare(config)?;
    let mut source = LineSource::new(config);
    let mut sorter = ExternalSorter::new(config, Comparator::for_sorting(config, locale.collation))?;
    let runs = sorter.sort_input(&mut source, &extractor)?;

    let mut output = OutputWriter::new(
        open()?,
        name,
        config,
        Comparator::for_validation(config, locale.collation),
        source.line_terminator(),
    );
    output.write_headers(source.headers())?;
    sorter.merge_into(runs, &mut output)?;
    let lines = output.finish()?;
    tracing::debug!(lines, "sort complete");
    Ok(())
}

/// Merge already sorted inputs; an unsorted input stops the merge
pub fn merge(config: &SortConfig) -> SortResult<ExitStatus> {
    let destination = Destination::from_config(config);
    merge_with(config, &destination.name(), || destination.open())
}

/// Merge already sorted inputs into `writer`
pub fn merge_into<W: Write>(config: &SortConfig, writer: W) -> SortResult<ExitStatus> {
    merge_with(config, "-", move || Ok(writer))
}

fn merge_with<W, F>(config: &SortConfig, name: &str, open: F) -> SortResult<ExitStatus>
where
    W: Write,
    F: FnOnce() -> SortResult<W>,
{
    let (locale, extractor) = prepare(config)?;
    let mut source = LineSource::new(config);
    let mut sorter = ExternalSorter::new(config, Comparator::for_sorting(config, locale.collation))?;
    let validation = Comparator::for_validation(config, locale.collation);

    let runs = match validate::prepare_merge(&mut source, &extractor, validation.clone(), &mut sorter)? {
        MergeInput::Ready(runs) => runs,
        MergeInput::Rejected(violation) => return Ok(ExitStatus::Disorder(violation)),
    };

    let mut output = OutputWriter::new(open()?, name, config, validation, source.line_terminator());
    output.write_headers(source.headers())?;
    sorter.merge_into(runs, &mut output)?;
    let lines = output.finish()?;
    tracing::debug!(lines, "merge complete");
    Ok(ExitStatus::Success)
}

/// Check that the inputs are sorted; writes nothing
pub fn check(config: &SortConfig) -> SortResult<ExitStatus> {
    let (locale, extractor) = prepare(config)?;
    let mut source = LineSource::new(config);
    validate::check_order(
        config,
        &mut source,
        &extractor,
        Comparator::for_validation(config, locale.collation),
    )
}

/// Dispatch on the configured process kind
pub fn run(config: &SortConfig) -> SortResult<ExitStatus> {
    match config.process {
        ProcessKind::Sort => sort(config).map(|()| ExitStatus::Success),
        ProcessKind::Merge => merge(config),
        ProcessKind::Check(_) => check(config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckKind;
    use proptest::prelude::*;
    use tempfile::NamedTempFile;

    fn input(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn path_of(file: &NamedTempFile) -> String {
        file.path().display().to_string()
    }

    fn sorted(builder: SortConfigBuilder, content: &[u8]) -> Vec<u8> {
        let file = input(content);
        let config = builder.input_file(path_of(&file)).build().unwrap();
        let mut out = Vec::new();
        sort_into(&config, &mut out).unwrap();
        out
    }

    #[test]
    fn test_default_sort() {
        assert_eq!(sorted(SortConfigBuilder::new(), b"b\nc\na\n"), b"a\nb\nc\n");
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        assert_eq!(sorted(SortConfigBuilder::new(), b""), b"");
    }

    #[test]
    fn test_crlf_input_keeps_crlf() {
        assert_eq!(
            sorted(SortConfigBuilder::new(), b"b\r\na\r\n"),
            b"a\r\nb\r\n"
        );
    }

    #[test]
    fn test_last_line_gets_terminator_across_spills() {
        assert_eq!(
            sorted(SortConfigBuilder::new().chunk_size_bound(1), b"c\r\na\r\nb"),
            b"a\r\nb\r\nc\r\n"
        );
        assert_eq!(
            sorted(SortConfigBuilder::new().chunk_size_bound(1), b"2\n3\n1"),
            b"1\n2\n3\n"
        );
    }

    #[test]
    fn test_header_stays_on_top() {
        assert_eq!(
            sorted(SortConfigBuilder::new().header(1, true), b"name\nz\ny\n"),
            b"name\ny\nz\n"
        );
    }

    #[test]
    fn test_field_keys_with_separator() {
        let out = sorted(
            SortConfigBuilder::new().field_separator(':').key("2,2n"),
            b"a:10\nb:9\nc:100\n",
        );
        assert_eq!(out, b"b:9\na:10\nc:100\n");
    }

    #[test]
    fn test_unique_with_spilling() {
        let out = sorted(
            SortConfigBuilder::new().unique().chunk_size_bound(2).batch_size(2),
            b"c\na\nb\na\nc\nb\na\n",
        );
        assert_eq!(out, b"a\nb\nc\n");
    }

    #[test]
    fn test_multiple_inputs_are_concatenated() {
        let first = input(b"3\n1\n");
        let second = input(b"2\n");
        let config = SortConfigBuilder::new()
            .key("1n")
            .input_files(vec![path_of(&first), path_of(&second)])
            .build()
            .unwrap();
        let mut out = Vec::new();
        sort_into(&config, &mut out).unwrap();
        assert_eq!(out, b"1\n2\n3\n");
    }

    #[test]
    fn test_output_may_overwrite_input() {
        let file = input(b"2\n1\n");
        let config = SortConfigBuilder::new()
            .input_file(path_of(&file))
            .output_file(path_of(&file))
            .build()
            .unwrap();
        sort(&config).unwrap();
        assert_eq!(std::fs::read(file.path()).unwrap(), b"1\n2\n");
    }

    #[test]
    fn test_merge_writes_nothing_on_disorder() {
        let first = input(b"1\n3\n");
        let second = input(b"4\n2\n");
        let config = SortConfigBuilder::new()
            .process(ProcessKind::Merge)
            .key("1n")
            .input_files(vec![path_of(&first), path_of(&second)])
            .build()
            .unwrap();
        let mut out = Vec::new();
        let status = merge_into(&config, &mut out).unwrap();
        assert_eq!(status.code(), EXIT_FAILURE);
        assert!(out.is_empty());
    }

    #[test]
    fn test_merge_success() {
        let first = input(b"1\n3\n");
        let second = input(b"2\n4\n");
        let config = SortConfigBuilder::new()
            .process(ProcessKind::Merge)
            .key("1n")
            .input_files(vec![path_of(&first), path_of(&second)])
            .build()
            .unwrap();
        let mut out = Vec::new();
        assert_eq!(merge_into(&config, &mut out).unwrap(), ExitStatus::Success);
        assert_eq!(out, b"1\n2\n3\n4\n");
    }

    #[test]
    fn test_run_dispatches_check() {
        let file = input(b"b\na\n");
        let config = SortConfigBuilder::new()
            .process(ProcessKind::Check(CheckKind::Quiet))
            .input_file(path_of(&file))
            .build()
            .unwrap();
        match run(&config).unwrap() {
            ExitStatus::Disorder(violation) => {
                assert_eq!(violation.line, 2);
                assert_eq!(violation.kind, ViolationKind::OutOfOrder);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let config = SortConfigBuilder::new()
            .input_file("/nonexistent/sort-input")
            .build()
            .unwrap();
        let err = sort_into(&config, Vec::new()).unwrap_err();
        assert_eq!(err.exit_code(), SORT_FAILURE);
    }

    fn lines_of(out: &[u8]) -> Vec<String> {
        String::from_utf8(out.to_vec())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    proptest! {
        #[test]
        fn stable_sort_keeps_input_order_of_ties(
            rows in proptest::collection::vec((0u8..4, 0u16..1000), 0..40),
            chunk in 1usize..8,
        ) {
            let content: String = rows.iter().map(|(k, v)| format!("{k} {v}\n")).collect();
            let out = sorted(
                SortConfigBuilder::new().key("1,1n").stable().chunk_size_bound(chunk),
                content.as_bytes(),
            );
            let mut expected = rows.clone();
            expected.sort_by_key(|(k, _)| *k);
            let expected: Vec<String> = expected.iter().map(|(k, v)| format!("{k} {v}")).collect();
            prop_assert_eq!(lines_of(&out), expected);
        }

        #[test]
        fn unique_keeps_one_line_per_key(
            rows in proptest::collection::vec((0u8..6, 0u16..1000), 0..40),
            chunk in 1usize..8,
        ) {
            let content: String = rows.iter().map(|(k, v)| format!("{k} {v}\n")).collect();
            let out = sorted(
                SortConfigBuilder::new().key("1,1n").unique().chunk_size_bound(chunk),
                content.as_bytes(),
            );
            let keys: Vec<u8> = lines_of(&out)
                .iter()
                .map(|line| line.split(' ').next().unwrap().parse().unwrap())
                .collect();
            let mut distinct: Vec<u8> = rows.iter().map(|(k, _)| *k).collect();
            distinct.sort_unstable();
            distinct.dedup();
            prop_assert_eq!(keys, distinct);
        }
    }
}
