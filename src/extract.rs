//! Field extraction: locating key spans in a line and decoding them

use crate::config::{FieldSeparator, IgnoreKind, KeyFieldSpec, SortConfig, SortKind, TranslateKind};
use crate::error::{SortError, SortResult};
use crate::key::{DecimalKey, DecoratedLine, ExtractedKey, FloatClass, TextKey, SI_SUFFIXES};
use crate::locale::{LocaleData, MonthTable, NumberFormat};
use md5::{Digest, Md5};
use rand::RngCore;
use std::fs::File;
use std::io::Read;

/// Bytes of `--random-source` used to seed the digest
const RANDOM_SEED_BYTES: u64 = 4096;

/// Blank as far as field splitting and key trimming are concerned.
/// No-break spaces are not blanks; they may be digit group separators.
pub fn is_blank(c: char) -> bool {
    c.is_whitespace() && !matches!(c, '\u{a0}' | '\u{2007}' | '\u{202f}')
}

pub fn is_printable(c: char) -> bool {
    !c.is_control() && !('\u{fff0}'..='\u{ffff}').contains(&c)
}

fn is_dictionary(c: char) -> bool {
    c.is_alphabetic() || c.is_numeric() || c.is_whitespace()
}

/// Iterator over `(start, limit)` byte spans of the fields of a line
pub struct FieldSpans<'a> {
    line: &'a str,
    pos: usize,
    separator: FieldSeparator,
    done: bool,
}

impl<'a> FieldSpans<'a> {
    pub fn new(line: &'a str, separator: FieldSeparator) -> Self {
        Self {
            line,
            pos: 0,
            separator,
            done: false,
        }
    }
}

impl Iterator for FieldSpans<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let start = self.pos;
        let rest = &self.line[start..];
        match self.separator {
            // A field is a run of blanks followed by a run of non-blanks
            FieldSeparator::Blanks => {
                let blanks = rest.find(|c: char| !is_blank(c)).unwrap_or(rest.len());
                if blanks == rest.len() {
                    self.done = true;
                    return None;
                }
                let word = rest[blanks..].find(is_blank).unwrap_or(rest.len() - blanks);
                self.pos = start + blanks + word;
                Some((start, self.pos))
            }
            FieldSeparator::Char(separator) => match rest.find(separator) {
                Some(offset) => {
                    self.pos = start + offset + separator.len_utf8();
                    Some((start, start + offset))
                }
                None => {
                    self.done = true;
                    Some((start, self.line.len()))
                }
            },
        }
    }
}

/// Character cursor over a key's text
struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.text[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Consume a run of matching characters and return it
    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.text[start..self.pos]
    }
}

/// Move `count` characters forward from `pos`, stopping at `limit`
fn advance_chars(line: &str, pos: usize, count: usize, limit: usize) -> usize {
    if pos >= limit {
        return pos;
    }
    match line[pos..limit].char_indices().nth(count) {
        Some((offset, _)) => pos + offset,
        None => limit,
    }
}

fn skip_blanks(line: &str, pos: usize, limit: usize) -> usize {
    if pos >= limit {
        return pos;
    }
    line[pos..limit]
        .find(|c: char| !is_blank(c))
        .map_or(limit, |offset| pos + offset)
}

/// Turns raw lines into decorated lines for a fixed set of keys
pub struct KeyExtractor {
    keys: Vec<KeyFieldSpec>,
    separator: FieldSeparator,
    number: NumberFormat,
    months: MonthTable,
    /// Digest state after absorbing the seed; cloned per key
    seeded_digest: Option<Md5>,
}

impl KeyExtractor {
    pub fn new(config: &SortConfig, locale: &LocaleData) -> SortResult<Self> {
        let seeded_digest = if config.has_random_keys() {
            let mut digest = Md5::new();
            digest.update(random_seed(config)?);
            Some(digest)
        } else {
            None
        };

        Ok(Self {
            keys: config.keys.clone(),
            separator: config.field_separator,
            number: locale.number,
            months: locale.months.clone(),
            seeded_digest,
        })
    }

    /// Attach keys to a line read at input position `sequence`
    pub fn decorate(&self, sequence: u64, line: String) -> DecoratedLine {
        let keys = self
            .keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                let (start, end) = self.resolve(&line, key);
                let extracted = self.decode(&line, start, end, key);
                tracing::trace!(
                    sequence,
                    key = index + 1,
                    kind = extracted.kind_name(),
                    text = &line[start..end],
                    "extracted key"
                );
                extracted
            })
            .collect();
        DecoratedLine {
            sequence,
            line,
            keys,
        }
    }

    fn field(&self, line: &str, number: usize) -> (usize, usize) {
        FieldSpans::new(line, self.separator)
            .nth(number - 1)
            .unwrap_or((line.len(), line.len()))
    }

    /// Resolve a key to a byte range of `line`; never negative width
    pub fn resolve(&self, line: &str, key: &KeyFieldSpec) -> (usize, usize) {
        let len = line.len();
        let ((mut start, start_limit), (mut end, end_limit)) = if key.is_whole_line() {
            ((0, len), (len, len))
        } else {
            let end_field = match key.end_field {
                Some(field) => self.field(line, field),
                None => (len, len),
            };
            (self.field(line, key.start_field), end_field)
        };

        let options = &key.options;
        if options.skip_start_blanks {
            start = skip_blanks(line, start, start_limit);
        }
        start = advance_chars(line, start, key.start_char.saturating_sub(1), start_limit);

        if key.end_char == 0 {
            end = end_limit;
        } else {
            if options.skip_end_blanks {
                end = skip_blanks(line, end, end_limit);
            }
            end = advance_chars(line, end, key.end_char, end_limit);
        }

        (start, end.max(start))
    }

    fn decode(&self, line: &str, start: usize, end: usize, key: &KeyFieldSpec) -> ExtractedKey {
        let options = &key.options;
        let transformed = options
            .has_transform()
            .then(|| transform(&line[start..end], options.ignore_kind, options.translate_kind));
        let text = transformed.as_deref().unwrap_or(&line[start..end]);
        let text_key = || match &transformed {
            Some(owned) => TextKey::Owned(owned.clone()),
            None => TextKey::span(line, start, end),
        };

        match options.sort_kind {
            SortKind::Text => ExtractedKey::Text(text_key()),
            SortKind::Numeric => ExtractedKey::Numeric(decode_decimal(text, &self.number, false)),
            SortKind::HumanNumeric => {
                ExtractedKey::HumanNumeric(decode_decimal(text, &self.number, true))
            }
            SortKind::GeneralNumeric => {
                let (class, value) = decode_float(text, self.number.decimal_point);
                ExtractedKey::GeneralNumeric { class, value }
            }
            SortKind::Month => ExtractedKey::Month(decode_month(text, &self.months)),
            SortKind::Random => ExtractedKey::Random {
                digest: self.digest(text),
                text: text_key(),
            },
            SortKind::Version => ExtractedKey::Version(decode_version(text)),
        }
    }

    fn digest(&self, text: &str) -> Vec<u8> {
        let mut digest = self.seeded_digest.clone().unwrap_or_default();
        digest.update(text.as_bytes());
        digest.finalize().to_vec()
    }
}

/// Seed bytes for random keys: `--random-source` or fresh randomness
fn random_seed(config: &SortConfig) -> SortResult<Vec<u8>> {
    let Some(path) = &config.random_source else {
        let mut seed = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut seed);
        return Ok(seed);
    };
    let to_error = |source| SortError::RandomSource {
        path: path.clone(),
        source,
    };
    let mut seed = Vec::new();
    File::open(path)
        .map_err(to_error)?
        .take(RANDOM_SEED_BYTES)
        .read_to_end(&mut seed)
        .map_err(to_error)?;
    tracing::debug!(bytes = seed.len(), path = %path.display(), "read random seed");
    Ok(seed)
}

/// Apply `-d`/`-i` filtering and `-f` folding to a key's text
pub fn transform(text: &str, ignore: IgnoreKind, translate: TranslateKind) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let keep = match ignore {
            IgnoreKind::None => true,
            IgnoreKind::NonDictionary => is_dictionary(c),
            IgnoreKind::NonPrinting => is_printable(c),
        };
        if !keep {
            continue;
        }
        match translate {
            TranslateKind::None => out.push(c),
            TranslateKind::ToUpper => out.extend(c.to_uppercase()),
        }
    }
    out
}

/// Decode `[blanks][-][digits][.digits][SI suffix]`
pub fn decode_decimal(text: &str, number: &NumberFormat, human: bool) -> DecimalKey {
    let mut cursor = Cursor::new(text);
    cursor.take_while(is_blank);
    let negative = cursor.eat('-');

    let mut leading_zero = false;
    while let Some(c) = cursor.peek() {
        if c != '0' && !number.is_group_separator(c, cursor.peek_second()) {
            break;
        }
        cursor.bump();
        leading_zero = true;
    }

    let mut integral = Vec::new();
    collect_digits(&mut cursor, number, &mut integral);
    if integral.is_empty() && (leading_zero || cursor.peek() == Some(number.decimal_point)) {
        integral.push(b'0');
    }

    let mut fractional = Vec::new();
    if cursor.eat(number.decimal_point) {
        collect_digits(&mut cursor, number, &mut fractional);
    }

    let mut si_rank = 0;
    if human {
        if let Some(suffix) = cursor.bump() {
            let suffix = if suffix == 'k' { 'K' } else { suffix };
            if let Some(index) = SI_SUFFIXES.find(suffix) {
                si_rank = index as i16 + 1;
            }
        }
    }

    DecimalKey::new(negative, si_rank, integral, fractional)
}

fn collect_digits(cursor: &mut Cursor<'_>, number: &NumberFormat, digits: &mut Vec<u8>) {
    while let Some(c) = cursor.peek() {
        if c.is_ascii_digit() {
            digits.push(c as u8);
        } else if !number.is_group_separator(c, cursor.peek_second()) {
            break;
        }
        cursor.bump();
    }
}

/// Decode a floating point key the way `strtod` reads a prefix
pub fn decode_float(text: &str, decimal_point: char) -> (FloatClass, f64) {
    let trimmed = text.trim_matches(is_blank);
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if unsigned.eq_ignore_ascii_case("nan") {
        return (FloatClass::NaN, f64::NAN);
    }
    if unsigned.eq_ignore_ascii_case("inf") || unsigned.eq_ignore_ascii_case("infinity") {
        let value = if negative { f64::NEG_INFINITY } else { f64::INFINITY };
        return (FloatClass::Number, value);
    }

    match float_prefix(trimmed, decimal_point).and_then(|prefix| prefix.parse::<f64>().ok()) {
        Some(value) => (FloatClass::Number, value),
        None => (FloatClass::Invalid, 0.0),
    }
}

/// Longest `[+-]digits[.digits][e[+-]digits]` prefix, with `.` as decimal point
fn float_prefix(text: &str, decimal_point: char) -> Option<String> {
    let mut cursor = Cursor::new(text);
    let mut out = String::new();
    if let Some(sign @ ('+' | '-')) = cursor.peek() {
        cursor.bump();
        out.push(sign);
    }
    let integral = cursor.take_while(|c| c.is_ascii_digit());
    out.push_str(integral);
    let mut fractional = "";
    if cursor.eat(decimal_point) {
        out.push('.');
        fractional = cursor.take_while(|c| c.is_ascii_digit());
        out.push_str(fractional);
    }
    if integral.is_empty() && fractional.is_empty() {
        return None;
    }

    if let Some('e' | 'E') = cursor.peek() {
        let mut exponent = Cursor::new(&cursor.text[cursor.pos..]);
        exponent.bump();
        let sign = match exponent.peek() {
            Some(sign @ ('+' | '-')) => {
                exponent.bump();
                Some(sign)
            }
            _ => None,
        };
        let digits = exponent.take_while(|c| c.is_ascii_digit());
        if !digits.is_empty() {
            out.push('e');
            out.extend(sign);
            out.push_str(digits);
        }
    }
    Some(out)
}

/// Month rank 1..=12 from a number or a (localized) month name, else 0
pub fn decode_month(text: &str, months: &MonthTable) -> i16 {
    let mut cursor = Cursor::new(text);
    cursor.take_while(is_blank);
    match cursor.peek() {
        Some(c) if c.is_ascii_digit() => {
            let digits = cursor.take_while(|c| c.is_ascii_digit());
            match digits.parse::<u32>() {
                Ok(month @ 1..=12) => month as i16,
                _ => 0,
            }
        }
        Some(c) if c.is_alphanumeric() || c == '_' => {
            let word = cursor.take_while(|c| c.is_alphanumeric() || c == '_');
            months.lookup(word)
        }
        _ => 0,
    }
}

/// The leading run of printable, non-blank characters after any blanks
pub fn decode_version(text: &str) -> String {
    let mut cursor = Cursor::new(text);
    cursor.take_while(is_blank);
    cursor
        .take_while(|c| is_printable(c) && !is_blank(c))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortConfigBuilder;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn extractor(config: &SortConfig) -> KeyExtractor {
        KeyExtractor::new(config, &LocaleData::c()).unwrap()
    }

    fn key_text(config: &SortConfig, line: &str) -> String {
        let extractor = extractor(config);
        let (start, end) = extractor.resolve(line, &config.keys[0]);
        line[start..end].to_string()
    }

    fn decimal(text: &str) -> DecimalKey {
        decode_decimal(text, &NumberFormat::default(), false)
    }

    #[test]
    fn test_blank_fields_include_leading_blanks() {
        let spans: Vec<_> = FieldSpans::new("  a bb   c", FieldSeparator::Blanks).collect();
        assert_eq!(spans, vec![(0, 3), (3, 6), (6, 10)]);
        assert_eq!(FieldSpans::new("   ", FieldSeparator::Blanks).count(), 0);
    }

    #[test]
    fn test_char_fields_keep_blanks() {
        let spans: Vec<_> = FieldSpans::new("a: b::c", FieldSeparator::Char(':')).collect();
        assert_eq!(spans, vec![(0, 1), (2, 4), (5, 5), (6, 7)]);
        let spans: Vec<_> = FieldSpans::new("", FieldSeparator::Char(':')).collect();
        assert_eq!(spans, vec![(0, 0)]);
    }

    #[test]
    fn test_resolve_field_and_char_positions() {
        let config = SortConfigBuilder::new().key("2").build().unwrap();
        assert_eq!(key_text(&config, "one  two three"), "  two three");

        let config = SortConfigBuilder::new().key("2b,2").build().unwrap();
        assert_eq!(key_text(&config, "one  two three"), "two");

        let config = SortConfigBuilder::new().key("2.2b,2.3b").build().unwrap();
        assert_eq!(key_text(&config, "one  two three"), "wo");

        let config = SortConfigBuilder::new()
            .key("2,2")
            .field_separator(':')
            .build()
            .unwrap();
        assert_eq!(key_text(&config, "a: b c:d"), " b c");
    }

    #[test]
    fn test_resolve_counts_characters_not_bytes() {
        let config = SortConfigBuilder::new().key("1.2,1.3").build().unwrap();
        assert_eq!(key_text(&config, "çéü rest"), "éü");
    }

    #[test]
    fn test_resolve_missing_and_empty_fields() {
        let config = SortConfigBuilder::new().key("5").build().unwrap();
        assert_eq!(key_text(&config, "a b"), "");

        let config = SortConfigBuilder::new().key("2,1").build().unwrap();
        let extractor = extractor(&config);
        let (start, end) = extractor.resolve("a b c", &config.keys[0]);
        assert_eq!(start, end);
    }

    #[test]
    fn test_numeric_decoding() {
        assert_eq!(decimal("007").integral, decimal("7").integral);
        let key = decimal("  -12.50x");
        assert!(key.is_negative());
        assert_eq!(key.integral, b"12");
        assert_eq!(key.fractional, b"50");
        assert_eq!(decimal("0").integral, b"0");
        assert_eq!(decimal(".5").integral, b"0");
        assert!(decimal("abc").is_empty());
        assert!(decimal("").is_empty());
    }

    #[test]
    fn test_group_separator_skipped() {
        let number = NumberFormat {
            decimal_point: ',',
            group_separator: Some('.'),
            lenient: false,
        };
        let key = decode_decimal("1.234,5", &number, false);
        assert_eq!(key.integral, b"1234");
        assert_eq!(key.fractional, b"5");
    }

    #[test]
    fn test_human_suffix_rank() {
        let number = NumberFormat::default();
        assert_eq!(decode_decimal("2K", &number, true).si_rank(), 1);
        assert_eq!(decode_decimal("2k", &number, true).si_rank(), 1);
        assert_eq!(decode_decimal("1G", &number, true).si_rank(), 3);
        assert_eq!(decode_decimal("-3M", &number, true).si_rank(), 2);
        assert!(decode_decimal("-3M", &number, true).is_negative());
        assert_eq!(decode_decimal("5x", &number, true).si_rank(), 0);
        assert_eq!(decode_decimal("5K", &number, false).si_rank(), 0);
    }

    #[test]
    fn test_general_numeric_decoding() {
        assert_eq!(decode_float(" 1.5e3 ", '.'), (FloatClass::Number, 1500.0));
        assert_eq!(decode_float("-.5", '.'), (FloatClass::Number, -0.5));
        assert_eq!(decode_float("12abc", '.'), (FloatClass::Number, 12.0));
        assert_eq!(decode_float("3e", '.'), (FloatClass::Number, 3.0));
        assert_eq!(decode_float("2,5", ','), (FloatClass::Number, 2.5));
        assert_eq!(decode_float("-Inf", '.'), (FloatClass::Number, f64::NEG_INFINITY));
        assert_eq!(decode_float("INFINITY", '.').1, f64::INFINITY);
        assert_eq!(decode_float("nan", '.').0, FloatClass::NaN);
        assert_eq!(decode_float("abc", '.').0, FloatClass::Invalid);
        assert_eq!(decode_float(".", '.').0, FloatClass::Invalid);
        assert_eq!(decode_float("", '.').0, FloatClass::Invalid);
    }

    #[test]
    fn test_month_decoding() {
        let months = MonthTable::english();
        assert_eq!(decode_month("  feb", &months), 2);
        assert_eq!(decode_month("December 3", &months), 12);
        assert_eq!(decode_month("07", &months), 7);
        assert_eq!(decode_month("13", &months), 0);
        assert_eq!(decode_month("Foo", &months), 0);
        assert_eq!(decode_month("-", &months), 0);
    }

    #[test]
    fn test_version_token() {
        assert_eq!(decode_version("  1.2.3-rc1 trailing"), "1.2.3-rc1");
        assert_eq!(decode_version("\u{7}x"), "");
    }

    #[test]
    fn test_transform_filters_and_folds() {
        assert_eq!(
            transform("a-b_c 1!", IgnoreKind::NonDictionary, TranslateKind::ToUpper),
            "ABC 1"
        );
        assert_eq!(transform("a\u{1}b", IgnoreKind::NonPrinting, TranslateKind::None), "ab");
    }

    #[test]
    fn test_text_key_materialized_only_with_transform() {
        let config = SortConfigBuilder::new().key("1").build().unwrap();
        let line = extractor(&config).decorate(1, "abc".to_string());
        assert_eq!(line.keys[0], ExtractedKey::Text(TextKey::Span { start: 0, limit: 3 }));

        let config = SortConfigBuilder::new().key("1f").build().unwrap();
        let line = extractor(&config).decorate(1, "abc".to_string());
        assert_eq!(line.keys[0], ExtractedKey::Text(TextKey::Owned("ABC".to_string())));
    }

    #[test]
    fn test_random_digest_deterministic_for_seed() {
        let mut seed = NamedTempFile::new().unwrap();
        seed.write_all(b"fixed seed").unwrap();
        let config = SortConfigBuilder::new()
            .key("1R")
            .random_source(seed.path())
            .build()
            .unwrap();
        let first = extractor(&config).decorate(1, "apple".to_string());
        let second = extractor(&config).decorate(2, "apple".to_string());
        let other = extractor(&config).decorate(3, "pear".to_string());
        let digest = |line: &DecoratedLine| match &line.keys[0] {
            ExtractedKey::Random { digest, .. } => digest.clone(),
            other => panic!("unexpected key {other:?}"),
        };
        assert_eq!(digest(&first), digest(&second));
        assert_ne!(digest(&first), digest(&other));
        assert_eq!(digest(&first).len(), 16);
    }

    #[test]
    fn test_missing_random_source_is_error() {
        let config = SortConfigBuilder::new()
            .key("1R")
            .random_source("/nonexistent/random/source")
            .build()
            .unwrap();
        assert!(matches!(
            KeyExtractor::new(&config, &LocaleData::c()),
            Err(SortError::RandomSource { .. })
        ));
    }
}
