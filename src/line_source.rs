//! Streaming line input across one or more files

use crate::config::SortConfig;
use crate::error::{SortContext, SortError, SortResult};
use encoding_rs::{Encoding, UTF_8};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// One input stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Stdin,
    Path(PathBuf),
}

impl Input {
    /// `-` names standard input
    pub fn from_name(name: &str) -> Self {
        if name == "-" {
            Input::Stdin
        } else {
            Input::Path(PathBuf::from(name))
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Input::Stdin => "-".to_string(),
            Input::Path(path) => path.display().to_string(),
        }
    }

    fn open(&self) -> SortResult<Box<dyn BufRead>> {
        match self {
            Input::Stdin => Ok(Box::new(BufReader::with_capacity(
                READ_BUFFER_SIZE,
                io::stdin(),
            ))),
            Input::Path(path) => {
                let file = File::open(path).with_file_context(&self.display_name())?;
                Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)))
            }
        }
    }
}

/// Inputs named by a configuration; none (or a lone `-`) means standard input
pub fn inputs_from_config(config: &SortConfig) -> Vec<Input> {
    if config.reading_from_stdin() {
        vec![Input::Stdin]
    } else {
        config
            .input_files
            .iter()
            .map(|name| Input::from_name(name))
            .collect()
    }
}

/// Line terminator written to the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTerminator {
    Lf,
    Cr,
    CrLf,
    Nul,
}

impl LineTerminator {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            LineTerminator::Lf => b"\n",
            LineTerminator::Cr => b"\r",
            LineTerminator::CrLf => b"\r\n",
            LineTerminator::Nul => b"\0",
        }
    }

    pub fn platform_default() -> Self {
        if cfg!(windows) {
            LineTerminator::CrLf
        } else {
            LineTerminator::Lf
        }
    }
}

/// Terminator styles seen so far
#[derive(Debug, Default, Clone, Copy)]
struct TerminatorStats {
    cr: bool,
    lf: bool,
    crlf: bool,
}

/// A sortable line and where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub text: String,
    /// Position among all lines read, headers included; starts at 1
    pub sequence: u64,
    /// Index into the input list
    pub file_index: usize,
    /// 1-based line number within its file
    pub line_number: u64,
}

/// Lazily reads lines from a list of inputs, one after another.
///
/// `\n`, `\r` and `\r\n` all end a line (or only NUL with `zero_terminated`);
/// a final unterminated line is still returned. Header lines are set aside
/// and never returned.
pub struct LineSource {
    inputs: Vec<Input>,
    /// Index of the open input, or of the next one to open
    file_index: usize,
    reader: Option<Box<dyn BufRead>>,
    exhausted: bool,
    zero_terminated: bool,
    encoding: &'static Encoding,
    header_lines: u64,
    header_every_file: bool,
    headers: Vec<String>,
    stats: TerminatorStats,
    pending: Vec<u8>,
    last_byte: Option<u8>,
    sequence: u64,
    line_number: u64,
}

impl LineSource {
    pub fn new(config: &SortConfig) -> Self {
        Self::with_inputs(inputs_from_config(config), config)
    }

    pub fn with_inputs(inputs: Vec<Input>, config: &SortConfig) -> Self {
        Self {
            inputs,
            file_index: 0,
            reader: None,
            exhausted: false,
            zero_terminated: config.zero_terminated,
            encoding: config.input_encoding,
            header_lines: config.header_lines as u64,
            header_every_file: config.header_every_file,
            headers: Vec::new(),
            stats: TerminatorStats::default(),
            pending: Vec::new(),
            last_byte: None,
            sequence: 0,
            line_number: 0,
        }
    }

    /// Header lines captured from the first input, in order
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Terminator to write: the one style seen, or the platform default
    pub fn line_terminator(&self) -> LineTerminator {
        if self.zero_terminated {
            return LineTerminator::Nul;
        }
        match (self.stats.cr, self.stats.lf, self.stats.crlf) {
            (true, false, false) => LineTerminator::Cr,
            (false, true, false) => LineTerminator::Lf,
            (false, false, true) => LineTerminator::CrLf,
            _ => LineTerminator::platform_default(),
        }
    }

    /// Display name of an input
    pub fn input_name(&self, file_index: usize) -> String {
        self.inputs
            .get(file_index)
            .map_or_else(|| "-".to_string(), Input::display_name)
    }

    /// Next sortable line, `None` once every input is exhausted
    pub fn next_line(&mut self) -> SortResult<Option<SourceLine>> {
        while !self.exhausted {
            if self.reader.is_none() && !self.open_next()? {
                break;
            }
            let Some(bytes) = self.read_raw_line()? else {
                self.reader = None;
                self.file_index += 1;
                continue;
            };

            self.sequence += 1;
            self.line_number += 1;
            let text = self.decode(bytes)?;
            let in_header = self.line_number <= self.header_lines
                && (self.header_every_file || self.file_index == 0);
            if in_header {
                if self.file_index == 0 {
                    self.headers.push(text);
                }
                continue;
            }
            return Ok(Some(SourceLine {
                text,
                sequence: self.sequence,
                file_index: self.file_index,
                line_number: self.line_number,
            }));
        }
        self.exhausted = true;
        Ok(None)
    }

    fn open_next(&mut self) -> SortResult<bool> {
        let Some(input) = self.inputs.get(self.file_index) else {
            self.exhausted = true;
            return Ok(false);
        };
        tracing::debug!(input = %input.display_name(), "opening input");
        self.reader = Some(input.open()?);
        self.last_byte = None;
        self.line_number = 0;
        Ok(true)
    }

    /// Raw bytes of the next line of the open input, `None` at its end
    fn read_raw_line(&mut self) -> SortResult<Option<Vec<u8>>> {
        let name = self.input_name(self.file_index);
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        loop {
            let buf = reader.fill_buf().with_file_context(&name)?;
            if buf.is_empty() {
                if self.zero_terminated && self.last_byte == Some(b'\r') {
                    self.stats.cr = true;
                }
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(std::mem::take(&mut self.pending)));
            }

            if self.zero_terminated {
                match buf.iter().position(|&b| b == 0) {
                    Some(end) => {
                        self.pending.extend_from_slice(&buf[..end]);
                        self.last_byte = Some(0);
                        reader.consume(end + 1);
                        return Ok(Some(std::mem::take(&mut self.pending)));
                    }
                    None => {
                        self.pending.extend_from_slice(buf);
                        self.last_byte = buf.last().copied();
                        let consumed = buf.len();
                        reader.consume(consumed);
                    }
                }
                continue;
            }

            let end = buf.iter().position(|&b| b == b'\n' || b == b'\r');
            let content = &buf[..end.unwrap_or(buf.len())];
            if !content.is_empty() {
                if self.last_byte == Some(b'\r') {
                    self.stats.cr = true;
                }
                self.pending.extend_from_slice(content);
                self.last_byte = content.last().copied();
            }
            let Some(end) = end else {
                let consumed = buf.len();
                reader.consume(consumed);
                continue;
            };

            let terminator = buf[end];
            reader.consume(end + 1);
            let previous = self.last_byte.replace(terminator);
            match (terminator, previous) {
                (b'\n', Some(b'\r')) => self.stats.crlf = true,
                (b'\n', _) => {
                    self.stats.lf = true;
                    return Ok(Some(std::mem::take(&mut self.pending)));
                }
                (_, Some(b'\r')) => {
                    self.stats.cr = true;
                    return Ok(Some(std::mem::take(&mut self.pending)));
                }
                _ => return Ok(Some(std::mem::take(&mut self.pending))),
            }
        }
    }

    fn decode(&self, bytes: Vec<u8>) -> SortResult<String> {
        let decode_error = || SortError::Decode {
            file: self.input_name(self.file_index),
            line: self.line_number,
            encoding: self.encoding.name(),
        };
        if self.encoding == UTF_8 {
            return String::from_utf8(bytes).map_err(|_| decode_error());
        }
        self.encoding
            .decode_without_bom_handling_and_without_replacement(&bytes)
            .map(|text| text.into_owned())
            .ok_or_else(decode_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortConfigBuilder;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    fn read_all(source: &mut LineSource) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().unwrap() {
            lines.push(line.text);
        }
        lines
    }

    fn source_for(files: &[&NamedTempFile], config: &SortConfig) -> LineSource {
        let inputs = files
            .iter()
            .map(|file| Input::Path(file.path().to_path_buf()))
            .collect();
        LineSource::with_inputs(inputs, config)
    }

    #[test]
    fn test_lf_lines_and_partial_last_line() {
        let file = temp_file(b"a\nb\nc");
        let mut source = source_for(&[&file], &SortConfig::default());
        assert_eq!(read_all(&mut source), vec!["a", "b", "c"]);
        assert_eq!(source.line_terminator(), LineTerminator::Lf);
        assert!(source.next_line().unwrap().is_none());
    }

    #[test]
    fn test_crlf_detected() {
        let file = temp_file(b"x\r\ny\r\n");
        let mut source = source_for(&[&file], &SortConfig::default());
        assert_eq!(read_all(&mut source), vec!["x", "y"]);
        assert_eq!(source.line_terminator(), LineTerminator::CrLf);
    }

    #[test]
    fn test_cr_detected() {
        let file = temp_file(b"x\ry\rz");
        let mut source = source_for(&[&file], &SortConfig::default());
        assert_eq!(read_all(&mut source), vec!["x", "y", "z"]);
        assert_eq!(source.line_terminator(), LineTerminator::Cr);
    }

    #[test]
    fn test_mixed_terminators_fall_back_to_default() {
        let file = temp_file(b"a\r\nb\nc\r\n");
        let mut source = source_for(&[&file], &SortConfig::default());
        assert_eq!(read_all(&mut source), vec!["a", "b", "c"]);
        assert_eq!(source.line_terminator(), LineTerminator::platform_default());
    }

    #[test]
    fn test_empty_lines_preserved() {
        let file = temp_file(b"\n\nq\n");
        let mut source = source_for(&[&file], &SortConfig::default());
        assert_eq!(read_all(&mut source), vec!["", "", "q"]);
    }

    #[test]
    fn test_files_concatenate_with_positions() {
        let first = temp_file(b"1\n2");
        let second = temp_file(b"3\n");
        let mut source = source_for(&[&first, &second], &SortConfig::default());
        let mut lines = Vec::new();
        while let Some(line) = source.next_line().unwrap() {
            lines.push((line.text, line.sequence, line.file_index, line.line_number));
        }
        assert_eq!(
            lines,
            vec![
                ("1".to_string(), 1, 0, 1),
                ("2".to_string(), 2, 0, 2),
                ("3".to_string(), 3, 1, 1),
            ]
        );
    }

    #[test]
    fn test_headers_from_every_file() {
        let first = temp_file(b"H1\nb\na\n");
        let second = temp_file(b"H2\nc\n");
        let config = SortConfigBuilder::new().header(1, true).build().unwrap();
        let mut source = source_for(&[&first, &second], &config);
        assert_eq!(read_all(&mut source), vec!["b", "a", "c"]);
        assert_eq!(source.headers(), ["H1".to_string()]);
    }

    #[test]
    fn test_headers_from_first_file_only() {
        let first = temp_file(b"H1\nb\n");
        let second = temp_file(b"H2\nc\n");
        let config = SortConfigBuilder::new().header(1, false).build().unwrap();
        let mut source = source_for(&[&first, &second], &config);
        assert_eq!(read_all(&mut source), vec!["b", "H2", "c"]);
        assert_eq!(source.headers(), ["H1".to_string()]);
    }

    #[test]
    fn test_zero_terminated_keeps_newlines() {
        let file = temp_file(b"a\nb\0c\0d");
        let config = SortConfigBuilder::new().zero_terminated().build().unwrap();
        let mut source = source_for(&[&file], &config);
        assert_eq!(read_all(&mut source), vec!["a\nb", "c", "d"]);
        assert_eq!(source.line_terminator(), LineTerminator::Nul);
    }

    #[test]
    fn test_zero_terminated_keeps_cr_before_nul() {
        let file = temp_file(b"a\r\0b\0");
        let config = SortConfigBuilder::new().zero_terminated().build().unwrap();
        let mut source = source_for(&[&file], &config);
        assert_eq!(read_all(&mut source), vec!["a\r", "b"]);
        assert_eq!(source.line_terminator(), LineTerminator::Nul);
    }

    #[test]
    fn test_missing_final_terminator_uses_first_seen_style() {
        let file = temp_file(b"b\r\na\r\nc");
        let mut source = source_for(&[&file], &SortConfig::default());
        assert_eq!(read_all(&mut source), vec!["b", "a", "c"]);
        assert_eq!(source.line_terminator(), LineTerminator::CrLf);

        let file = temp_file(b"y\rx");
        let mut source = source_for(&[&file], &SortConfig::default());
        assert_eq!(read_all(&mut source), vec!["y", "x"]);
        assert_eq!(source.line_terminator(), LineTerminator::Cr);
    }

    #[test]
    fn test_decodes_configured_encoding() {
        let file = temp_file(b"caf\xe9\n");
        let config = SortConfigBuilder::new()
            .encodings(encoding_rs::WINDOWS_1252, UTF_8)
            .build()
            .unwrap();
        let mut source = source_for(&[&file], &config);
        assert_eq!(read_all(&mut source), vec!["café"]);
    }

    #[test]
    fn test_invalid_utf8_is_fatal() {
        let file = temp_file(b"ok\n\xff\xfe\n");
        let mut source = source_for(&[&file], &SortConfig::default());
        assert!(source.next_line().unwrap().is_some());
        match source.next_line() {
            Err(SortError::Decode { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_reported() {
        let config = SortConfig::default();
        let mut source = LineSource::with_inputs(
            vec![Input::Path(PathBuf::from("/nonexistent/input.txt"))],
            &config,
        );
        assert!(matches!(source.next_line(), Err(SortError::FileNotFound { .. })));
    }
}
