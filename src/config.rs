//! Configuration management for sort operations

use crate::error::{SortError, SortResult};
use crate::locale::LocaleSpec;
use encoding_rs::{Encoding, UTF_8};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Lines assumed per byte of sort buffer when sizing chunks
const ASSUMED_LINE_BYTES: u64 = 256;
/// Smallest buffer used to size chunks, whatever `-S` says
const MIN_BUFFER_BYTES: u64 = 10 * 1024 * 1024;
/// Default merge fan-in (`--batch-size`)
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Comparison semantics of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortKind {
    #[default]
    Text,
    GeneralNumeric,
    HumanNumeric,
    Numeric,
    Month,
    Random,
    Version,
}

impl SortKind {
    /// Map an ordering option letter to its kind
    pub fn from_flag(flag: char) -> Option<Self> {
        match flag {
            'g' => Some(SortKind::GeneralNumeric),
            'h' => Some(SortKind::HumanNumeric),
            'n' => Some(SortKind::Numeric),
            'M' => Some(SortKind::Month),
            'R' => Some(SortKind::Random),
            'V' => Some(SortKind::Version),
            _ => None,
        }
    }

    /// Kinds whose decoding skips leading blanks on its own
    pub fn skips_blanks_implicitly(&self) -> bool {
        !matches!(self, SortKind::Text | SortKind::Random)
    }
}

impl FromStr for SortKind {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general-numeric" => Ok(SortKind::GeneralNumeric),
            "human-numeric" => Ok(SortKind::HumanNumeric),
            "numeric" => Ok(SortKind::Numeric),
            "month" => Ok(SortKind::Month),
            "random" => Ok(SortKind::Random),
            "version" => Ok(SortKind::Version),
            _ => Err(SortError::invalid_option(
                "--sort",
                "expected general-numeric, human-numeric, numeric, month, random or version",
            )),
        }
    }
}

impl fmt::Display for SortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKind::Text => "text",
            SortKind::GeneralNumeric => "general-numeric",
            SortKind::HumanNumeric => "human-numeric",
            SortKind::Numeric => "numeric",
            SortKind::Month => "month",
            SortKind::Random => "random",
            SortKind::Version => "version",
        };
        write!(f, "{name}")
    }
}

/// Characters dropped from a key before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IgnoreKind {
    #[default]
    None,
    /// `-d`: keep only alphanumerics and blanks
    NonDictionary,
    /// `-i`: keep only printable characters
    NonPrinting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslateKind {
    #[default]
    None,
    /// `-f`: fold lower case to upper case
    ToUpper,
}

/// Ordering options attached to a key (or given globally)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyOptions {
    pub sort_kind: SortKind,
    pub ignore_kind: IgnoreKind,
    pub translate_kind: TranslateKind,
    pub skip_start_blanks: bool,
    pub skip_end_blanks: bool,
    pub reverse: bool,
}

/// Where an option letter appeared; `b` means different things in each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlagPosition {
    Global,
    KeyStart,
    KeyEnd,
}

impl KeyOptions {
    /// Parse a run of global option letters such as `"nr"` or `"bf"`
    pub fn from_flags(flags: &str) -> SortResult<Self> {
        let mut options = Self::default();
        for flag in flags.chars() {
            options.apply_flag(flag, FlagPosition::Global, flags)?;
        }
        Ok(options)
    }

    /// Apply one global option letter
    pub fn apply_global_flag(&mut self, flag: char) -> SortResult<()> {
        self.apply_flag(flag, FlagPosition::Global, &flag.to_string())
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn is_default_except_reverse(&self) -> bool {
        Self {
            reverse: false,
            ..*self
        }
        .is_default()
    }

    /// True if extraction must materialize a filtered copy of the key
    pub fn has_transform(&self) -> bool {
        self.ignore_kind != IgnoreKind::None || self.translate_kind != TranslateKind::None
    }

    /// Set the sort kind, rejecting a second, different kind
    pub fn set_sort_kind(&mut self, kind: SortKind) -> SortResult<()> {
        if self.sort_kind != SortKind::Text && self.sort_kind != kind {
            return Err(SortError::conflicting_options(&format!(
                "options '{}' and '{}' are incompatible",
                self.sort_kind, kind
            )));
        }
        self.sort_kind = kind;
        Ok(())
    }

    fn set_ignore_kind(&mut self, kind: IgnoreKind) -> SortResult<()> {
        if self.ignore_kind != IgnoreKind::None && self.ignore_kind != kind {
            return Err(SortError::conflicting_options(
                "options 'd' and 'i' are incompatible",
            ));
        }
        self.ignore_kind = kind;
        Ok(())
    }

    fn apply_flag(&mut self, flag: char, position: FlagPosition, context: &str) -> SortResult<()> {
        if let Some(kind) = SortKind::from_flag(flag) {
            return self.set_sort_kind(kind);
        }
        match flag {
            'b' => match position {
                FlagPosition::Global => {
                    self.skip_start_blanks = true;
                    self.skip_end_blanks = true;
                }
                FlagPosition::KeyStart => self.skip_start_blanks = true,
                FlagPosition::KeyEnd => self.skip_end_blanks = true,
            },
            'd' => self.set_ignore_kind(IgnoreKind::NonDictionary)?,
            'i' => self.set_ignore_kind(IgnoreKind::NonPrinting)?,
            'f' => self.translate_kind = TranslateKind::ToUpper,
            'r' => self.reverse = true,
            _ => {
                return Err(SortError::invalid_key_spec(&format!(
                    "{context}: invalid ordering option '{flag}'"
                )))
            }
        }
        Ok(())
    }

    fn flag_letters(&self) -> String {
        let mut letters = String::new();
        match self.sort_kind {
            SortKind::Text => {}
            SortKind::GeneralNumeric => letters.push('g'),
            SortKind::HumanNumeric => letters.push('h'),
            SortKind::Numeric => letters.push('n'),
            SortKind::Month => letters.push('M'),
            SortKind::Random => letters.push('R'),
            SortKind::Version => letters.push('V'),
        }
        match self.ignore_kind {
            IgnoreKind::None => {}
            IgnoreKind::NonDictionary => letters.push('d'),
            IgnoreKind::NonPrinting => letters.push('i'),
        }
        if self.translate_kind == TranslateKind::ToUpper {
            letters.push('f');
        }
        if self.reverse {
            letters.push('r');
        }
        letters
    }
}

/// Location of one key within a line plus its ordering options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFieldSpec {
    /// 1-based start field; 0 selects the whole line
    pub start_field: usize,
    /// 1-based character within the start field; 0 means its first character
    pub start_char: usize,
    /// 1-based end field; `None` runs to the end of the line
    pub end_field: Option<usize>,
    /// 1-based last character within the end field; 0 means the field end
    pub end_char: usize,
    pub options: KeyOptions,
}

impl KeyFieldSpec {
    /// A key spanning the entire line
    pub fn whole_line(options: KeyOptions) -> Self {
        Self {
            start_field: 0,
            start_char: 0,
            end_field: None,
            end_char: 0,
            options,
        }
    }

    pub fn is_whole_line(&self) -> bool {
        self.start_field == 0
    }

    /// Parse a KEYDEF `F[.C][OPTS][,F[.C][OPTS]]`.
    ///
    /// A key without ordering options of its own inherits `global`.
    pub fn parse(keydef: &str, global: &KeyOptions) -> SortResult<Self> {
        let mut segments = keydef.split(',');
        let start = segments.next().unwrap_or_default().trim();
        let end = segments.next().map(str::trim);
        if segments.next().is_some() {
            return Err(SortError::invalid_key_spec(&format!(
                "{keydef}: extra field specification"
            )));
        }

        let mut options = KeyOptions::default();
        let (start_field, start_char, start_flags) = Self::parse_position(start, keydef, true)?;
        for flag in start_flags.chars() {
            options.apply_flag(flag, FlagPosition::KeyStart, keydef)?;
        }

        let (end_field, end_char) = match end {
            Some(end) => {
                let (field, char_pos, end_flags) = Self::parse_position(end, keydef, false)?;
                for flag in end_flags.chars() {
                    options.apply_flag(flag, FlagPosition::KeyEnd, keydef)?;
                }
                (Some(field), char_pos)
            }
            None => (None, 0),
        };

        if options.is_default() {
            options = *global;
        }

        Ok(Self {
            start_field,
            start_char,
            end_field,
            end_char,
            options,
        })
    }

    /// Parse `F[.C]` and return the trailing option letters
    fn parse_position<'a>(
        spec: &'a str,
        keydef: &str,
        start: bool,
    ) -> SortResult<(usize, usize, &'a str)> {
        let digits = spec.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(SortError::invalid_key_spec(&format!(
                "{keydef}: field number expected"
            )));
        }
        let field = parse_count(&spec[..digits], keydef)?;
        if field == 0 {
            return Err(SortError::invalid_key_spec(&format!(
                "{keydef}: field number is zero"
            )));
        }

        let mut rest = &spec[digits..];
        let mut char_pos = 0;
        if let Some(after_dot) = rest.strip_prefix('.') {
            let char_digits = after_dot.bytes().take_while(u8::is_ascii_digit).count();
            if char_digits == 0 {
                return Err(SortError::invalid_key_spec(&format!(
                    "{keydef}: character offset expected"
                )));
            }
            char_pos = parse_count(&after_dot[..char_digits], keydef)?;
            if start && char_pos == 0 {
                return Err(SortError::invalid_key_spec(&format!(
                    "{keydef}: character offset is zero"
                )));
            }
            rest = &after_dot[char_digits..];
        }
        Ok((field, char_pos, rest))
    }
}

fn parse_count(digits: &str, keydef: &str) -> SortResult<usize> {
    digits
        .parse::<usize>()
        .map_err(|_| SortError::invalid_key_spec(&format!("{keydef}: position too large")))
}

impl fmt::Display for KeyFieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole_line() {
            return write!(f, "line{}", self.options.flag_letters());
        }
        write!(f, "{}", self.start_field)?;
        if self.start_char > 0 {
            write!(f, ".{}", self.start_char)?;
        }
        if self.options.skip_start_blanks {
            write!(f, "b")?;
        }
        write!(f, "{}", self.options.flag_letters())?;
        if let Some(end_field) = self.end_field {
            write!(f, ",{end_field}")?;
            if self.end_char > 0 {
                write!(f, ".{}", self.end_char)?;
            }
            if self.options.skip_end_blanks {
                write!(f, "b")?;
            }
        }
        Ok(())
    }
}

/// What a run does with its input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessKind {
    #[default]
    Sort,
    Merge,
    Check(CheckKind),
}

/// How a check run reports disorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckKind {
    /// `-c`: report the first out-of-order line
    #[default]
    DiagnoseFirst,
    /// `-C`: exit status only
    Quiet,
}

impl FromStr for CheckKind {
    type Err = SortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diagnose-first" => Ok(CheckKind::DiagnoseFirst),
            "quiet" | "silent" => Ok(CheckKind::Quiet),
            _ => Err(SortError::invalid_option(
                "--check",
                "expected diagnose-first, quiet or silent",
            )),
        }
    }
}

/// Field splitting rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldSeparator {
    /// Fields are non-blank runs, each including the blanks before it
    #[default]
    Blanks,
    /// Fields are separated by exactly this character
    Char(char),
}

impl FieldSeparator {
    /// Parse a `-t` value: `x`, `'x'`, `\x`, `'\x'` or `'/x'`
    pub fn parse(value: &str) -> SortResult<Self> {
        let chars: Vec<char> = value.chars().collect();
        let unquoted = match chars.as_slice() {
            ['\'', inner @ .., '\''] if !inner.is_empty() => inner,
            other => other,
        };
        let separator = match unquoted {
            [c] => *c,
            ['\\' | '/', escaped] => match escaped {
                't' => '\t',
                'r' => '\r',
                'n' => '\n',
                'f' => '\x0c',
                '0' => '\0',
                other => *other,
            },
            _ => {
                return Err(SortError::invalid_field_separator(&format!(
                    "{value}: expected x, 'x', '\\x' or '/x'"
                )))
            }
        };
        Ok(FieldSeparator::Char(separator))
    }
}

/// `-S` buffer size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSize {
    Bytes(u64),
    PercentOfMemory(u64),
}

impl FromStr for BufferSize {
    type Err = SortError;

    /// `N[%bKMGTPEZY]`; a bare number counts kibibytes
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(SortError::invalid_buffer_size(s));
        }
        let value: u64 = s[..digits]
            .parse()
            .map_err(|_| SortError::invalid_buffer_size(s))?;
        let suffix = &s[digits..];
        if suffix == "%" {
            if value > 100 {
                return Err(SortError::invalid_buffer_size(s));
            }
            return Ok(BufferSize::PercentOfMemory(value));
        }
        let shift = match suffix {
            "b" => 0,
            "" | "K" | "k" => 10,
            "M" => 20,
            "G" => 30,
            "T" => 40,
            "P" => 50,
            "E" => 60,
            "Z" | "Y" => 70,
            _ => return Err(SortError::invalid_buffer_size(s)),
        };
        Ok(BufferSize::Bytes(value.saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX))))
    }
}

impl BufferSize {
    pub fn bytes(&self) -> u64 {
        match self {
            BufferSize::Bytes(bytes) => *bytes,
            BufferSize::PercentOfMemory(percent) => physical_memory() / 100 * percent,
        }
    }
}

#[cfg(unix)]
fn physical_memory() -> u64 {
    let (pages, page_size) = unsafe {
        (
            libc::sysconf(libc::_SC_PHYS_PAGES),
            libc::sysconf(libc::_SC_PAGESIZE),
        )
    };
    if pages <= 0 || page_size <= 0 {
        return MIN_BUFFER_BYTES;
    }
    (pages as u64).saturating_mul(page_size as u64)
}

#[cfg(not(unix))]
fn physical_memory() -> u64 {
    MIN_BUFFER_BYTES
}

/// Parse `--header N[,every|first]` into (lines, every file)
pub fn parse_header(value: &str) -> SortResult<(usize, bool)> {
    let mut segments = value.split(',');
    let lines = segments
        .next()
        .map(str::trim)
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| SortError::invalid_option("--header", "number of lines expected"))?;
    let every_file = match segments.next().map(str::trim) {
        None => true,
        Some(mode) if mode.eq_ignore_ascii_case("every") => true,
        Some(mode) if mode.eq_ignore_ascii_case("first") => false,
        Some(_) => return Err(SortError::invalid_option("--header", "expected every or first")),
    };
    if segments.next().is_some() {
        return Err(SortError::invalid_option("--header", "expected N[,every|first]"));
    }
    Ok((lines, every_file))
}

/// Parse `--locale TEXT[,NUMBER]`
pub fn parse_locale_pair(value: &str) -> SortResult<(LocaleSpec, LocaleSpec)> {
    let segments: Vec<&str> = value.split(',').collect();
    match segments.as_slice() {
        [both] => {
            let spec = LocaleSpec::parse(both);
            Ok((spec.clone(), spec))
        }
        [text, number] => Ok((LocaleSpec::parse(text), LocaleSpec::parse(number))),
        _ => Err(SortError::invalid_option(
            "--locale",
            "expected locale or text-locale,number-locale",
        )),
    }
}

/// Look up an `encoding_rs` encoding by WHATWG label
pub fn encoding_for_label(label: &str) -> SortResult<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| SortError::UnsupportedEncoding {
        label: label.trim().to_string(),
    })
}

/// Parse `--encoding IN[,OUT]`
pub fn parse_encoding_pair(value: &str) -> SortResult<(&'static Encoding, &'static Encoding)> {
    let segments: Vec<&str> = value.split(',').collect();
    match segments.as_slice() {
        [both] => {
            let encoding = encoding_for_label(both)?;
            Ok((encoding, encoding))
        }
        [input, output] => Ok((encoding_for_label(input)?, encoding_for_label(output)?)),
        _ => Err(SortError::invalid_option(
            "--encoding",
            "expected charset or in-charset,out-charset",
        )),
    }
}

/// Main configuration structure for sort operations
#[derive(Debug, Clone)]
pub struct SortConfig {
    pub process: ProcessKind,
    /// Effective keys; empty means the whole line compared as text
    pub keys: Vec<KeyFieldSpec>,
    /// True when the only key was synthesized from global options
    pub global_key_only: bool,
    /// Global options, also the fallback for keys without their own
    pub global_options: KeyOptions,
    pub stable: bool,
    pub unique: bool,
    /// Reverses the last-resort whole-line comparison
    pub reverse: bool,
    pub zero_terminated: bool,
    pub header_lines: usize,
    pub header_every_file: bool,
    pub field_separator: FieldSeparator,
    pub text_locale: LocaleSpec,
    pub number_locale: LocaleSpec,
    pub input_encoding: &'static Encoding,
    pub output_encoding: &'static Encoding,
    pub buffer_size: Option<BufferSize>,
    /// Explicit lines-per-chunk, overriding the `buffer_size` estimate
    pub chunk_size_bound: Option<usize>,
    /// Merge fan-in
    pub batch_size: usize,
    pub temp_dir: Option<PathBuf>,
    pub random_source: Option<PathBuf>,
    pub compress_program: Option<String>,
    /// Accepted and ignored apart from a warning
    pub parallel: Option<usize>,
    /// Input files; empty (or a lone `-`) reads standard input
    pub input_files: Vec<String>,
    pub output_file: Option<String>,
    pub debug: bool,
    /// Break ties between equal random digests by key text
    pub random_tie_break: bool,
    /// Accept a plain space as a no-break-space group separator and `.` in `,`-decimal locales
    pub lenient_number_separators: bool,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            process: ProcessKind::Sort,
            keys: Vec::new(),
            global_key_only: false,
            global_options: KeyOptions::default(),
            stable: false,
            unique: false,
            reverse: false,
            zero_terminated: false,
            header_lines: 0,
            header_every_file: false,
            field_separator: FieldSeparator::Blanks,
            text_locale: LocaleSpec::C,
            number_locale: LocaleSpec::C,
            input_encoding: UTF_8,
            output_encoding: UTF_8,
            buffer_size: None,
            chunk_size_bound: None,
            batch_size: DEFAULT_BATCH_SIZE,
            temp_dir: None,
            random_source: None,
            compress_program: None,
            parallel: None,
            input_files: Vec::new(),
            output_file: None,
            debug: false,
            random_tie_break: false,
            lenient_number_separators: false,
        }
    }
}

impl SortConfig {
    /// Validate configuration for consistency
    pub fn validate(&self) -> SortResult<()> {
        if self.batch_size < 2 {
            return Err(SortError::invalid_option(
                "--batch-size",
                "minimum merge batch size is 2",
            ));
        }

        if self.chunk_size_bound == Some(0) {
            return Err(SortError::invalid_buffer_size("chunk size must be at least one line"));
        }

        if let Some(BufferSize::Bytes(0)) = self.buffer_size {
            return Err(SortError::invalid_buffer_size("0"));
        }

        for encoding in [self.input_encoding, self.output_encoding] {
            if !encoding.is_ascii_compatible() {
                return Err(SortError::UnsupportedEncoding {
                    label: encoding.name().to_string(),
                });
            }
        }

        for key in &self.keys {
            if let Some(end_field) = key.end_field {
                if end_field == 0 {
                    return Err(SortError::invalid_key_spec(&key.to_string()));
                }
            }
        }

        Ok(())
    }

    /// Number of lines held in memory before a chunk is spilled
    pub fn chunk_line_bound(&self) -> usize {
        if let Some(lines) = self.chunk_size_bound {
            return lines;
        }
        let bytes = self
            .buffer_size
            .map_or(0, |size| size.bytes())
            .max(MIN_BUFFER_BYTES);
        usize::try_from(bytes / ASSUMED_LINE_BYTES).unwrap_or(usize::MAX)
    }

    /// Check if reading from stdin
    pub fn reading_from_stdin(&self) -> bool {
        self.input_files.is_empty() || (self.input_files.len() == 1 && self.input_files[0] == "-")
    }

    pub fn has_random_keys(&self) -> bool {
        self.keys
            .iter()
            .any(|key| key.options.sort_kind == SortKind::Random)
    }

    /// Usage warnings reported under `--debug`
    pub fn diagnostics(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(threads) = self.parallel {
            warnings.push(format!(
                "--parallel={threads}: parallel sorting is not supported, using one thread ({} available)",
                num_cpus::get()
            ));
        }
        if let Some(dir) = &self.temp_dir {
            if !dir.is_dir() {
                warnings.push(format!(
                    "--temporary-directory: no such directory: {}",
                    dir.display()
                ));
            }
        }
        if self.random_source.is_some() && !self.has_random_keys() {
            warnings.push("--random-source: specified but no key sorts randomly".to_string());
        }

        for (index, key) in self.keys.iter().enumerate() {
            let name = format!("key {}", index + 1);
            if key.is_whole_line() {
                continue;
            }
            let options = &key.options;
            let mut empty = false;
            match key.end_field {
                Some(end_field) if key.start_field > end_field => {
                    empty = true;
                    warnings.push(format!("{name}: key is empty, start field follows end field"));
                }
                Some(end_field) if key.start_field == end_field => {
                    if options.skip_start_blanks != options.skip_end_blanks {
                        warnings.push(format!(
                            "{name}: start and end of the same field skip blanks differently"
                        ));
                    } else if key.end_char != 0 && key.start_char > key.end_char {
                        empty = true;
                        warnings.push(format!(
                            "{name}: key is empty, start character follows end character"
                        ));
                    }
                }
                _ => {}
            }

            let implicit_blanks = options.sort_kind.skips_blanks_implicitly();
            let line_offset = key.end_field == Some(1) && key.end_char > 0;
            let blanks_matter = (!options.skip_start_blanks && !implicit_blanks)
                || (!options.skip_start_blanks && key.start_char > 0)
                || (!options.skip_end_blanks && key.end_char > 0);
            if !empty
                && !self.global_key_only
                && self.field_separator == FieldSeparator::Blanks
                && !line_offset
                && blanks_matter
            {
                warnings.push(format!(
                    "{name}: leading blanks are significant in {} keys; consider also specifying 'b'",
                    options.sort_kind
                ));
            }

            if implicit_blanks && key.end_field != Some(key.start_field) {
                warnings.push(format!(
                    "{name}: {} key spans multiple fields",
                    options.sort_kind
                ));
            }
        }

        warnings
    }
}

/// Resolve `-k` definitions against the global options
fn resolve_keys(
    keydefs: &[String],
    global: &KeyOptions,
) -> SortResult<(Vec<KeyFieldSpec>, bool)> {
    let keys = keydefs
        .iter()
        .map(|keydef| KeyFieldSpec::parse(keydef, global))
        .collect::<SortResult<Vec<_>>>()?;
    if keys.is_empty() && !global.is_default_except_reverse() {
        return Ok((vec![KeyFieldSpec::whole_line(*global)], true));
    }
    Ok((keys, false))
}

/// Builder pattern for creating configurations
pub struct SortConfigBuilder {
    config: SortConfig,
    keydefs: Vec<String>,
}

impl SortConfigBuilder {
    /// Start building a new configuration
    pub fn new() -> Self {
        Self {
            config: SortConfig::default(),
            keydefs: Vec::new(),
        }
    }

    pub fn process(mut self, process: ProcessKind) -> Self {
        self.config.process = process;
        self
    }

    /// Replace the global ordering options
    pub fn global_options(mut self, options: KeyOptions) -> Self {
        self.config.global_options = options;
        self
    }

    /// Add a `-k` KEYDEF, resolved in `build`
    pub fn key(mut self, keydef: &str) -> Self {
        self.keydefs.push(keydef.to_string());
        self
    }

    /// Enable global reverse sorting
    pub fn reverse(mut self) -> Self {
        self.config.global_options.reverse = true;
        self
    }

    /// Enable unique output
    pub fn unique(mut self) -> Self {
        self.config.unique = true;
        self
    }

    /// Enable stable sorting
    pub fn stable(mut self) -> Self {
        self.config.stable = true;
        self
    }

    /// Enable zero-terminated lines
    pub fn zero_terminated(mut self) -> Self {
        self.config.zero_terminated = true;
        self
    }

    pub fn field_separator(mut self, separator: char) -> Self {
        self.config.field_separator = FieldSeparator::Char(separator);
        self
    }

    pub fn header(mut self, lines: usize, every_file: bool) -> Self {
        self.config.header_lines = lines;
        self.config.header_every_file = every_file;
        self
    }

    pub fn locales(mut self, text: LocaleSpec, number: LocaleSpec) -> Self {
        self.config.text_locale = text;
        self.config.number_locale = number;
        self
    }

    pub fn encodings(mut self, input: &'static Encoding, output: &'static Encoding) -> Self {
        self.config.input_encoding = input;
        self.config.output_encoding = output;
        self
    }

    pub fn buffer_size(mut self, size: BufferSize) -> Self {
        self.config.buffer_size = Some(size);
        self
    }

    pub fn chunk_size_bound(mut self, lines: usize) -> Self {
        self.config.chunk_size_bound = Some(lines);
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = Some(dir.into());
        self
    }

    pub fn random_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.random_source = Some(path.into());
        self
    }

    pub fn compress_program(mut self, program: &str) -> Self {
        self.config.compress_program = Some(program.to_string());
        self
    }

    pub fn parallel(mut self, threads: usize) -> Self {
        self.config.parallel = Some(threads);
        self
    }

    pub fn input_file(mut self, file: impl Into<String>) -> Self {
        self.config.input_files.push(file.into());
        self
    }

    pub fn input_files(mut self, files: Vec<String>) -> Self {
        self.config.input_files = files;
        self
    }

    /// Set output file
    pub fn output_file(mut self, file: impl Into<String>) -> Self {
        self.config.output_file = Some(file.into());
        self
    }

    pub fn debug(mut self) -> Self {
        self.config.debug = true;
        self
    }

    pub fn random_tie_break(mut self) -> Self {
        self.config.random_tie_break = true;
        self
    }

    pub fn lenient_number_separators(mut self) -> Self {
        self.config.lenient_number_separators = true;
        self
    }

    /// Resolve keys and build the final configuration
    pub fn build(self) -> SortResult<SortConfig> {
        let mut config = self.config;
        let (keys, global_key_only) = resolve_keys(&self.keydefs, &config.global_options)?;
        config.keys = keys;
        config.global_key_only = global_key_only;
        config.reverse = config.global_options.reverse;
        config.validate()?;
        Ok(config)
    }
}

impl Default for SortConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SortConfig::default();
        assert_eq!(config.process, ProcessKind::Sort);
        assert!(config.keys.is_empty());
        assert!(!config.reverse);
        assert!(!config.unique);
        assert!(!config.stable);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_parse_simple_key() {
        let key = KeyFieldSpec::parse("2", &KeyOptions::default()).unwrap();
        assert_eq!(key.start_field, 2);
        assert_eq!(key.start_char, 0);
        assert_eq!(key.end_field, None);
        assert!(key.options.is_default());
    }

    #[test]
    fn test_parse_key_with_positions_and_options() {
        let key = KeyFieldSpec::parse("2.3nr,4.5b", &KeyOptions::default()).unwrap();
        assert_eq!(key.start_field, 2);
        assert_eq!(key.start_char, 3);
        assert_eq!(key.end_field, Some(4));
        assert_eq!(key.end_char, 5);
        assert_eq!(key.options.sort_kind, SortKind::Numeric);
        assert!(key.options.reverse);
        assert!(!key.options.skip_start_blanks);
        assert!(key.options.skip_end_blanks);
    }

    #[test]
    fn test_key_end_char_zero_means_field_end() {
        let key = KeyFieldSpec::parse("1,1.0", &KeyOptions::default()).unwrap();
        assert_eq!(key.end_field, Some(1));
        assert_eq!(key.end_char, 0);
    }

    #[test]
    fn test_key_inherits_global_options_only_when_bare() {
        let global = KeyOptions::from_flags("fr").unwrap();
        let bare = KeyFieldSpec::parse("3", &global).unwrap();
        assert_eq!(bare.options, global);

        let own = KeyFieldSpec::parse("3n", &global).unwrap();
        assert_eq!(own.options.sort_kind, SortKind::Numeric);
        assert!(!own.options.reverse);
        assert_eq!(own.options.translate_kind, TranslateKind::None);
    }

    #[test]
    fn test_invalid_keys() {
        let global = KeyOptions::default();
        assert!(KeyFieldSpec::parse("0", &global).is_err());
        assert!(KeyFieldSpec::parse("1.0", &global).is_err());
        assert!(KeyFieldSpec::parse("x", &global).is_err());
        assert!(KeyFieldSpec::parse("1.", &global).is_err());
        assert!(KeyFieldSpec::parse("1,2,3", &global).is_err());
        assert!(KeyFieldSpec::parse("1q", &global).is_err());
        assert!(matches!(
            KeyFieldSpec::parse("1n,2M", &global),
            Err(SortError::ConflictingOptions { .. })
        ));
        assert!(matches!(
            KeyFieldSpec::parse("1di", &global),
            Err(SortError::ConflictingOptions { .. })
        ));
    }

    #[test]
    fn test_global_only_key_synthesized() {
        let config = SortConfigBuilder::new()
            .global_options(KeyOptions::from_flags("n").unwrap())
            .build()
            .unwrap();
        assert!(config.global_key_only);
        assert_eq!(config.keys.len(), 1);
        assert!(config.keys[0].is_whole_line());
        assert_eq!(config.keys[0].options.sort_kind, SortKind::Numeric);
    }

    #[test]
    fn test_reverse_alone_uses_last_resort() {
        let config = SortConfigBuilder::new().reverse().build().unwrap();
        assert!(config.keys.is_empty());
        assert!(config.reverse);
    }

    #[test]
    fn test_field_separator_forms() {
        assert_eq!(FieldSeparator::parse(":").unwrap(), FieldSeparator::Char(':'));
        assert_eq!(FieldSeparator::parse("','").unwrap(), FieldSeparator::Char(','));
        assert_eq!(FieldSeparator::parse("'\\t'").unwrap(), FieldSeparator::Char('\t'));
        assert_eq!(FieldSeparator::parse("'/t'").unwrap(), FieldSeparator::Char('\t'));
        assert_eq!(FieldSeparator::parse("\\0").unwrap(), FieldSeparator::Char('\0'));
        assert!(FieldSeparator::parse("ab").is_err());
        assert!(FieldSeparator::parse("").is_err());
    }

    #[test]
    fn test_buffer_size_suffixes() {
        assert_eq!("10".parse::<BufferSize>().unwrap(), BufferSize::Bytes(10 * 1024));
        assert_eq!("512b".parse::<BufferSize>().unwrap(), BufferSize::Bytes(512));
        assert_eq!("2M".parse::<BufferSize>().unwrap(), BufferSize::Bytes(2 << 20));
        assert_eq!("50%".parse::<BufferSize>().unwrap(), BufferSize::PercentOfMemory(50));
        assert!("M".parse::<BufferSize>().is_err());
        assert!("10Q".parse::<BufferSize>().is_err());
        assert!("150%".parse::<BufferSize>().is_err());
    }

    #[test]
    fn test_chunk_line_bound() {
        let config = SortConfig::default();
        assert_eq!(config.chunk_line_bound(), (10 * 1024 * 1024) / 256);

        let config = SortConfigBuilder::new()
            .buffer_size(BufferSize::Bytes(1 << 30))
            .build()
            .unwrap();
        assert_eq!(config.chunk_line_bound(), (1 << 30) / 256);

        let config = SortConfig {
            chunk_size_bound: Some(3),
            ..SortConfig::default()
        };
        assert_eq!(config.chunk_line_bound(), 3);
    }

    #[test]
    fn test_header_parsing() {
        assert_eq!(parse_header("2").unwrap(), (2, true));
        assert_eq!(parse_header("1, first").unwrap(), (1, false));
        assert_eq!(parse_header("3,EVERY").unwrap(), (3, true));
        assert!(parse_header("x").is_err());
        assert!(parse_header("1,some").is_err());
    }

    #[test]
    fn test_encoding_pair() {
        let (input, output) = parse_encoding_pair("latin1, utf-8").unwrap();
        assert_eq!(input, encoding_rs::WINDOWS_1252);
        assert_eq!(output, UTF_8);
        assert!(parse_encoding_pair("no-such-charset").is_err());
    }

    #[test]
    fn test_validate_rejects_ascii_incompatible_encoding() {
        let result = SortConfigBuilder::new()
            .encodings(encoding_rs::UTF_16LE, UTF_8)
            .build();
        assert!(matches!(result, Err(SortError::UnsupportedEncoding { .. })));
    }

    #[test]
    fn test_validate_batch_size() {
        assert!(SortConfigBuilder::new().batch_size(1).build().is_err());
        assert!(SortConfigBuilder::new().batch_size(2).build().is_ok());
    }

    #[test]
    fn test_diagnostics() {
        let config = SortConfigBuilder::new()
            .key("2n")
            .key("3")
            .parallel(4)
            .random_source("/dev/urandom")
            .build()
            .unwrap();
        let warnings = config.diagnostics();
        assert!(warnings.iter().any(|w| w.contains("--parallel")));
        assert!(warnings.iter().any(|w| w.contains("--random-source")));
        assert!(warnings.iter().any(|w| w.contains("key 1: numeric key spans multiple fields")));
        assert!(warnings.iter().any(|w| w.contains("key 2: leading blanks are significant")));
    }

    #[test]
    fn test_key_display_round_trips() {
        let key = KeyFieldSpec::parse("2.3n,4.5", &KeyOptions::default()).unwrap();
        assert_eq!(key.to_string(), "2.3n,4.5");
        let reparsed = KeyFieldSpec::parse(&key.to_string(), &KeyOptions::default()).unwrap();
        assert_eq!(reparsed, key);
    }

    #[test]
    fn test_reading_from_stdin() {
        let config = SortConfig::default();
        assert!(config.reading_from_stdin());

        let config = SortConfig {
            input_files: vec!["-".to_string()],
            ..SortConfig::default()
        };
        assert!(config.reading_from_stdin());

        let config = SortConfig {
            input_files: vec!["file.txt".to_string()],
            ..SortConfig::default()
        };
        assert!(!config.reading_from_stdin());
    }
}
