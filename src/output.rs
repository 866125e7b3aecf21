//! Writing sorted lines: headers, terminators, encoding and `-u`

use crate::compare::Comparator;
use crate::config::SortConfig;
use crate::error::{SortContext, SortError, SortResult};
use crate::key::DecoratedLine;
use crate::line_source::LineTerminator;
use encoding_rs::{Encoding, UTF_8};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

const OUTPUT_BUFFER_SIZE: usize = 64 * 1024;

/// Receives decorated lines in their final order
pub trait LineSink {
    fn accept(&mut self, line: DecoratedLine) -> SortResult<()>;
}

/// Where the output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl Destination {
    pub fn from_config(config: &SortConfig) -> Self {
        match &config.output_file {
            Some(name) if name != "-" => Destination::File(PathBuf::from(name)),
            _ => Destination::Stdout,
        }
    }

    pub fn name(&self) -> String {
        match self {
            Destination::Stdout => "-".to_string(),
            Destination::File(path) => path.display().to_string(),
        }
    }

    /// Open for writing; a file is only truncated here, after all input is read
    pub fn open(&self) -> SortResult<Box<dyn Write>> {
        match self {
            Destination::Stdout => Ok(Box::new(io::stdout().lock())),
            Destination::File(path) => {
                let file = File::create(path).with_file_context(&self.name())?;
                Ok(Box::new(file))
            }
        }
    }
}

/// Buffered line writer honoring terminator, encoding and uniqueness
pub struct OutputWriter<W: Write> {
    writer: BufWriter<W>,
    name: String,
    terminator: LineTerminator,
    encoding: &'static Encoding,
    /// Comparator deciding duplicates when `-u` is set
    dedupe: Option<Comparator>,
    previous: Option<DecoratedLine>,
    written: u64,
}

impl<W: Write> OutputWriter<W> {
    pub fn new(
        writer: W,
        name: &str,
        config: &SortConfig,
        comparator: Comparator,
        terminator: LineTerminator,
    ) -> Self {
        Self {
            writer: BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, writer),
            name: name.to_string(),
            terminator,
            encoding: config.output_encoding,
            dedupe: config.unique.then_some(comparator),
            previous: None,
            written: 0,
        }
    }

    /// Emit header lines verbatim ahead of any data
    pub fn write_headers(&mut self, headers: &[String]) -> SortResult<()> {
        for header in headers {
            self.write_text(header)?;
        }
        Ok(())
    }

    fn write_text(&mut self, text: &str) -> SortResult<()> {
        if self.encoding == UTF_8 {
            self.writer
                .write_all(text.as_bytes())
                .with_file_context(&self.name)?;
        } else {
            let (bytes, _, had_errors) = self.encoding.encode(text);
            if had_errors {
                return Err(SortError::Encode {
                    encoding: self.encoding.name(),
                });
            }
            self.writer.write_all(&bytes).with_file_context(&self.name)?;
        }
        self.writer
            .write_all(self.terminator.as_bytes())
            .with_file_context(&self.name)
    }

    /// Flush and return the number of data lines written
    pub fn finish(mut self) -> SortResult<u64> {
        self.writer.flush().with_file_context(&self.name)?;
        Ok(self.written)
    }
}

impl<W: Write> LineSink for OutputWriter<W> {
    fn accept(&mut self, line: DecoratedLine) -> SortResult<()> {
        if let (Some(comparator), Some(previous)) = (&self.dedupe, &self.previous) {
            if comparator.compare(previous, &line) == Ordering::Equal {
                return Ok(());
            }
        }
        self.write_text(&line.line)?;
        self.written += 1;
        if self.dedupe.is_some() {
            self.previous = Some(line);
        }
        Ok(())
    }
}
