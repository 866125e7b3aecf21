//! Binary spill format for sorted runs of decorated lines
//!
//! Record layout, all integers big-endian:
//!
//! ```text
//! [sequence]   u32, or u64 with the top bit set; only when stable
//! key*         one encoding per configured key, chosen by its sort kind
//! line         u32 length + UTF-8 bytes
//! ```
//!
//! A text key is tag 0 with `u32` start and limit byte offsets into the line,
//! or tag 1 with a `u32` length and its own bytes.

use crate::config::{SortConfig, SortKind};
use crate::error::{SortContext, SortError, SortResult};
use crate::key::{DecimalKey, DecoratedLine, ExtractedKey, FloatClass, TextKey};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

const CHUNK_BUFFER_SIZE: usize = 128 * 1024;
const WIDE_SEQUENCE: u64 = 1 << 63;
const SPAN_TAG: u8 = 0;
const OWNED_TAG: u8 = 1;

/// How chunk bytes reach the disk
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    /// Filter program: compresses stdin to stdout, and decompresses with `-d`
    Program(String),
}

impl Compression {
    pub fn from_config(config: &SortConfig) -> Self {
        match &config.compress_program {
            Some(program) if !program.is_empty() => Compression::Program(program.clone()),
            _ => Compression::None,
        }
    }
}

/// Everything needed to write and read back chunks of one run
#[derive(Debug, Clone)]
pub struct ChunkFormat {
    kinds: Vec<SortKind>,
    stable: bool,
    compression: Compression,
}

impl ChunkFormat {
    pub fn new(kinds: Vec<SortKind>, stable: bool, compression: Compression) -> Self {
        Self {
            kinds,
            stable,
            compression,
        }
    }

    pub fn from_config(config: &SortConfig) -> Self {
        Self::new(
            config.keys.iter().map(|key| key.options.sort_kind).collect(),
            config.stable,
            Compression::from_config(config),
        )
    }

    pub fn create(&self, path: &Path) -> SortResult<ChunkWriter> {
        let name = path.display().to_string();
        let file = File::create(path).with_file_context(&name)?;
        let (sink, child): (Box<dyn Write>, Option<Child>) = match &self.compression {
            Compression::None => (Box::new(file), None),
            Compression::Program(program) => {
                let mut child = Command::new(program)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::from(file))
                    .spawn()
                    .map_err(|e| SortError::compression(program, &e.to_string()))?;
                let stdin = child
                    .stdin
                    .take()
                    .ok_or_else(|| SortError::compression(program, "no stdin pipe"))?;
                (Box::new(stdin), Some(child))
            }
        };
        Ok(ChunkWriter {
            writer: Some(BufWriter::with_capacity(CHUNK_BUFFER_SIZE, sink)),
            child,
            format: self.clone(),
            path: path.to_path_buf(),
            lines: 0,
        })
    }

    pub fn open(&self, path: &Path) -> SortResult<ChunkReader> {
        let name = path.display().to_string();
        let file = File::open(path).with_file_context(&name)?;
        let (source, child): (Box<dyn Read>, Option<Child>) = match &self.compression {
            Compression::None => (Box::new(file), None),
            Compression::Program(program) => {
                let mut child = Command::new(program)
                    .arg("-d")
                    .stdin(Stdio::from(file))
                    .stdout(Stdio::piped())
                    .spawn()
                    .map_err(|e| SortError::compression(program, &e.to_string()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| SortError::compression(program, "no stdout pipe"))?;
                (Box::new(stdout), Some(child))
            }
        };
        Ok(ChunkReader {
            reader: BufReader::with_capacity(CHUNK_BUFFER_SIZE, source),
            child,
            format: self.clone(),
            path: path.to_path_buf(),
            finished: false,
        })
    }

    fn program(&self) -> &str {
        match &self.compression {
            Compression::None => "",
            Compression::Program(program) => program,
        }
    }
}

fn wait_for(child: &mut Child, program: &str) -> SortResult<()> {
    let status = child
        .wait()
        .map_err(|e| SortError::compression(program, &e.to_string()))?;
    if status.success() {
        Ok(())
    } else {
        Err(SortError::compression(program, &format!("exited with {status}")))
    }
}

/// Appends records to a chunk file
pub struct ChunkWriter {
    writer: Option<BufWriter<Box<dyn Write>>>,
    child: Option<Child>,
    format: ChunkFormat,
    path: PathBuf,
    lines: u64,
}

impl ChunkWriter {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&mut self, line: &DecoratedLine) -> SortResult<()> {
        let name = self.path.display().to_string();
        let stable = self.format.stable;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SortError::internal("chunk writer already finished"))?;
        encode_line(writer, line, stable).with_file_context(&name)?;
        self.lines += 1;
        Ok(())
    }

    /// Flush everything and wait for the compressor; returns the record count
    pub fn finish(mut self) -> SortResult<u64> {
        let name = self.path.display().to_string();
        if let Some(mut writer) = self.writer.take() {
            writer.flush().with_file_context(&name)?;
        }
        if let Some(mut child) = self.child.take() {
            wait_for(&mut child, self.format.program())?;
        }
        Ok(self.lines)
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        self.writer.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn encode_line<W: Write>(out: &mut W, line: &DecoratedLine, stable: bool) -> io::Result<()> {
    if stable {
        if line.sequence < WIDE_SEQUENCE >> 32 {
            out.write_all(&(line.sequence as u32).to_be_bytes())?;
        } else {
            out.write_all(&(line.sequence | WIDE_SEQUENCE).to_be_bytes())?;
        }
    }
    for key in &line.keys {
        match key {
            ExtractedKey::Text(text) => encode_text(out, text)?,
            ExtractedKey::GeneralNumeric { class, value } => {
                out.write_all(&class.code().to_be_bytes())?;
                out.write_all(&value.to_bits().to_be_bytes())?;
            }
            ExtractedKey::Numeric(decimal) | ExtractedKey::HumanNumeric(decimal) => {
                out.write_all(&decimal.sign_magnitude.to_be_bytes())?;
                encode_bytes(out, &decimal.integral)?;
                encode_bytes(out, &decimal.fractional)?;
            }
            ExtractedKey::Month(rank) => out.write_all(&rank.to_be_bytes())?,
            ExtractedKey::Random { digest, text } => {
                encode_bytes(out, digest)?;
                encode_text(out, text)?;
            }
            ExtractedKey::Version(token) => encode_bytes(out, token.as_bytes())?,
        }
    }
    encode_bytes(out, line.line.as_bytes())
}

fn encode_text<W: Write>(out: &mut W, text: &TextKey) -> io::Result<()> {
    match text {
        TextKey::Span { start, limit } => {
            out.write_all(&[SPAN_TAG])?;
            out.write_all(&start.to_be_bytes())?;
            out.write_all(&limit.to_be_bytes())
        }
        TextKey::Owned(owned) => {
            out.write_all(&[OWNED_TAG])?;
            encode_bytes(out, owned.as_bytes())
        }
    }
}

fn encode_bytes<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "record field too large"))?;
    out.write_all(&len.to_be_bytes())?;
    out.write_all(bytes)
}

/// Pull-based reader over the records of one chunk
pub struct ChunkReader {
    reader: BufReader<Box<dyn Read>>,
    child: Option<Child>,
    format: ChunkFormat,
    path: PathBuf,
    finished: bool,
}

impl ChunkReader {
    /// Next record, `None` at a clean end of the chunk
    pub fn next_line(&mut self) -> SortResult<Option<DecoratedLine>> {
        if self.finished {
            return Ok(None);
        }
        let name = self.path.display().to_string();
        let at_end = self.reader.fill_buf().with_file_context(&name)?.is_empty();
        if at_end {
            self.finished = true;
            if let Some(mut child) = self.child.take() {
                wait_for(&mut child, self.format.program())?;
            }
            return Ok(None);
        }
        let line = decode_line(&mut self.reader, &self.format).map_err(|err| match err {
            DecodeFailure::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                SortError::serialization(&format!("{name}: truncated record"))
            }
            DecodeFailure::Io(e) => SortError::Io(e),
            DecodeFailure::Corrupt(message) => SortError::serialization(&format!("{name}: {message}")),
        });
        if line.is_err() {
            self.finished = true;
        }
        line.map(Some)
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

enum DecodeFailure {
    Io(io::Error),
    Corrupt(String),
}

impl From<io::Error> for DecodeFailure {
    fn from(err: io::Error) -> Self {
        DecodeFailure::Io(err)
    }
}

fn read_array<R: Read, const N: usize>(input: &mut R) -> Result<[u8; N], DecodeFailure> {
    let mut buf = [0u8; N];
    input.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_i16<R: Read>(input: &mut R) -> Result<i16, DecodeFailure> {
    Ok(i16::from_be_bytes(read_array(input)?))
}

fn read_u32<R: Read>(input: &mut R) -> Result<u32, DecodeFailure> {
    Ok(u32::from_be_bytes(read_array(input)?))
}

fn read_bytes<R: Read>(input: &mut R) -> Result<Vec<u8>, DecodeFailure> {
    let len = read_u32(input)? as usize;
    let mut buf = Vec::new();
    input.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(DecodeFailure::Io(io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(buf)
}

fn read_string<R: Read>(input: &mut R) -> Result<String, DecodeFailure> {
    String::from_utf8(read_bytes(input)?)
        .map_err(|_| DecodeFailure::Corrupt("invalid UTF-8 in record".to_string()))
}

fn read_text<R: Read>(input: &mut R) -> Result<TextKey, DecodeFailure> {
    match read_array::<R, 1>(input)?[0] {
        SPAN_TAG => Ok(TextKey::Span {
            start: read_u32(input)?,
            limit: read_u32(input)?,
        }),
        OWNED_TAG => Ok(TextKey::Owned(read_string(input)?)),
        tag => Err(DecodeFailure::Corrupt(format!("unknown text tag {tag}"))),
    }
}

fn read_decimal<R: Read>(input: &mut R) -> Result<DecimalKey, DecodeFailure> {
    Ok(DecimalKey {
        sign_magnitude: read_i16(input)?,
        integral: read_bytes(input)?,
        fractional: read_bytes(input)?,
    })
}

fn decode_line<R: Read>(input: &mut R, format: &ChunkFormat) -> Result<DecoratedLine, DecodeFailure> {
    let sequence = if format.stable {
        let head = read_u32(input)?;
        if head & 0x8000_0000 == 0 {
            u64::from(head)
        } else {
            let tail = read_u32(input)?;
            ((u64::from(head) << 32) | u64::from(tail)) & !WIDE_SEQUENCE
        }
    } else {
        0
    };

    let mut keys = Vec::with_capacity(format.kinds.len());
    for kind in &format.kinds {
        let key = match kind {
            SortKind::Text => ExtractedKey::Text(read_text(input)?),
            SortKind::GeneralNumeric => {
                let code = read_i16(input)?;
                let class = FloatClass::from_code(code)
                    .ok_or_else(|| DecodeFailure::Corrupt(format!("unknown float class {code}")))?;
                let value = f64::from_bits(u64::from_be_bytes(read_array(input)?));
                ExtractedKey::GeneralNumeric { class, value }
            }
            SortKind::Numeric => ExtractedKey::Numeric(read_decimal(input)?),
            SortKind::HumanNumeric => ExtractedKey::HumanNumeric(read_decimal(input)?),
            SortKind::Month => ExtractedKey::Month(read_i16(input)?),
            SortKind::Random => ExtractedKey::Random {
                digest: read_bytes(input)?,
                text: read_text(input)?,
            },
            SortKind::Version => ExtractedKey::Version(read_string(input)?),
        };
        keys.push(key);
    }

    let line = read_string(input)?;
    Ok(DecoratedLine {
        sequence,
        line,
        keys,
    })
}
