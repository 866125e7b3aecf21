//! Locale-derived comparison data
//!
//! Collation, decimal/group separators and month names are resolved once when a
//! run starts and handed to the extractor and comparator as plain values. Text
//! collation for non-C locales goes through the system `strcoll`, which reads the
//! process `LC_COLLATE` category set during resolution.

use crate::error::{SortError, SortResult};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::ffi::CString;
use std::sync::Mutex;

/// Serializes `setlocale`/`localeconv`/`nl_langinfo`, which share process state.
static LOCALE_LOCK: Mutex<()> = Mutex::new(());

const ENGLISH_MONTHS: [&str; 12] = [
    "JANUARY", "FEBRUARY", "MARCH", "APRIL", "MAY", "JUNE",
    "JULY", "AUGUST", "SEPTEMBER", "OCTOBER", "NOVEMBER", "DECEMBER",
];

/// Which locale a category should follow
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LocaleSpec {
    /// The C/POSIX locale: byte collation, `.` decimal point, no grouping
    #[default]
    C,
    /// Whatever `LC_ALL`/`LC_*`/`LANG` select
    Environment,
    /// An explicit locale name such as `de_DE.UTF-8`
    Named(String),
}

impl LocaleSpec {
    /// Parse one `--locale` segment: `none`, `default`, or a locale name
    pub fn parse(value: &str) -> Self {
        let value = value.trim();
        if value.eq_ignore_ascii_case("none") || value.eq_ignore_ascii_case("no") {
            LocaleSpec::C
        } else if value.eq_ignore_ascii_case("default") {
            LocaleSpec::Environment
        } else if value == "C" || value == "POSIX" {
            LocaleSpec::C
        } else {
            LocaleSpec::Named(value.to_string())
        }
    }
}

/// How text keys and whole lines are collated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Collation {
    /// Code point order (byte order of the UTF-8 text)
    #[default]
    Bytes,
    /// System `strcoll` under the resolved `LC_COLLATE`
    System,
}

impl Collation {
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            Collation::Bytes => a.cmp(b),
            Collation::System => strcoll_compare(a.as_bytes(), b.as_bytes()),
        }
    }
}

/// Locale-aware string comparison using strcoll
pub fn strcoll_compare(a: &[u8], b: &[u8]) -> Ordering {
    // Fast path for identical strings
    if a == b {
        return Ordering::Equal;
    }

    // Strings with interior NULs cannot be passed to strcoll
    let (a_cstr, b_cstr) = match (CString::new(a), CString::new(b)) {
        (Ok(a_cstr), Ok(b_cstr)) => (a_cstr, b_cstr),
        _ => return a.cmp(b),
    };

    let result = unsafe { libc::strcoll(a_cstr.as_ptr(), b_cstr.as_ptr()) };
    // strcoll may call distinct strings equal; byte order keeps the result total
    result.cmp(&0).then_with(|| a.cmp(b))
}

/// Decimal point and digit grouping used by numeric keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumberFormat {
    pub decimal_point: char,
    pub group_separator: Option<char>,
    /// Accept a plain space as a no-break-space group separator and `.` as an
    /// alternate decimal point in `,`-decimal locales
    pub lenient: bool,
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            decimal_point: '.',
            group_separator: None,
            lenient: false,
        }
    }
}

impl NumberFormat {
    /// True if `c` is skipped inside a digit run. `next` is the character after it.
    pub fn is_group_separator(&self, c: char, next: Option<char>) -> bool {
        if Some(c) == self.group_separator {
            return true;
        }
        if !self.lenient {
            return false;
        }
        let nbsp_group = matches!(self.group_separator, Some('\u{a0}') | Some('\u{202f}'));
        (nbsp_group && c == ' ' && next.map_or(false, |n| n.is_ascii_digit()))
            || (self.decimal_point == ',' && c == '.')
    }
}

/// Upper-cased month names (full and abbreviated) mapped to 1..=12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthTable {
    names: HashMap<String, i16>,
}

impl Default for MonthTable {
    fn default() -> Self {
        Self::english()
    }
}

impl MonthTable {
    pub fn english() -> Self {
        let mut table = Self {
            names: HashMap::with_capacity(48),
        };
        for (i, name) in ENGLISH_MONTHS.iter().enumerate() {
            let rank = i as i16 + 1;
            table.insert(name, rank);
            table.insert(&name[..3], rank);
        }
        table
    }

    /// Register a localized name; trailing dots of abbreviations are dropped
    pub fn insert(&mut self, name: &str, rank: i16) {
        let key = name.trim().trim_end_matches('.').to_uppercase();
        if !key.is_empty() {
            self.names.entry(key).or_insert(rank);
        }
    }

    /// Rank of `word` (case-insensitive), 0 when unknown
    pub fn lookup(&self, word: &str) -> i16 {
        self.names.get(&word.to_uppercase()).copied().unwrap_or(0)
    }
}

/// Everything locale-dependent that a run needs
#[derive(Debug, Clone, Default)]
pub struct LocaleData {
    pub collation: Collation,
    pub number: NumberFormat,
    pub months: MonthTable,
}

impl LocaleData {
    /// The C locale; never touches process locale state
    pub fn c() -> Self {
        Self::default()
    }

    /// Resolve the text and number locales once for a run
    pub fn resolve(text: &LocaleSpec, number: &LocaleSpec, lenient: bool) -> SortResult<Self> {
        let mut data = Self::c();
        data.number.lenient = lenient;
        if *text == LocaleSpec::C && *number == LocaleSpec::C {
            return Ok(data);
        }

        let _guard = LOCALE_LOCK
            .lock()
            .map_err(|_| SortError::internal("locale lock poisoned"))?;

        if let Some(name) = set_category(libc::LC_COLLATE, text)? {
            tracing::debug!(locale = %name, "using locale collation");
            data.collation = Collation::System;
        }

        if set_category(libc::LC_NUMERIC, number)?.is_some() {
            let (decimal_point, group_separator) = read_numeric_conventions();
            data.number.decimal_point = decimal_point;
            data.number.group_separator = group_separator;
            restore_c(libc::LC_NUMERIC);
        }

        for spec in [text, number] {
            if set_category(libc::LC_TIME, spec)?.is_some() {
                for (rank, name) in read_month_names() {
                    data.months.insert(&name, rank);
                }
                restore_c(libc::LC_TIME);
            }
        }

        Ok(data)
    }
}

/// Apply `spec` to one category; returns the resolved name unless it is C/POSIX
fn set_category(category: libc::c_int, spec: &LocaleSpec) -> SortResult<Option<String>> {
    let requested = match spec {
        LocaleSpec::C => return Ok(None),
        LocaleSpec::Environment => CString::default(),
        LocaleSpec::Named(name) => CString::new(name.as_str())
            .map_err(|_| SortError::invalid_option("--locale", "locale name contains NUL"))?,
    };

    let resolved = unsafe { libc::setlocale(category, requested.as_ptr()) };
    if resolved.is_null() {
        return match spec {
            LocaleSpec::Named(name) => Err(SortError::invalid_option(
                "--locale",
                &format!("locale not available: {name}"),
            )),
            _ => {
                tracing::warn!("environment locale is not available, using C locale");
                Ok(None)
            }
        };
    }

    let name = unsafe { std::ffi::CStr::from_ptr(resolved) }
        .to_string_lossy()
        .into_owned();
    if name == "C" || name == "POSIX" {
        Ok(None)
    } else {
        Ok(Some(name))
    }
}

fn restore_c(category: libc::c_int) {
    unsafe {
        libc::setlocale(category, b"C\0".as_ptr().cast());
    }
}

fn c_str_to_string(ptr: *const libc::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let text = unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn read_numeric_conventions() -> (char, Option<char>) {
    let conv = unsafe { libc::localeconv() };
    if conv.is_null() {
        return ('.', None);
    }
    let (decimal, group) = unsafe { ((*conv).decimal_point, (*conv).thousands_sep) };
    let decimal_point = c_str_to_string(decimal)
        .and_then(|s| s.chars().next())
        .unwrap_or('.');
    let group_separator = c_str_to_string(group).and_then(|s| s.chars().next());
    (decimal_point, group_separator)
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn read_month_names() -> Vec<(i16, String)> {
    let mut names = Vec::with_capacity(24);
    for i in 0..12 {
        let rank = i as i16 + 1;
        for item in [libc::MON_1 + i, libc::ABMON_1 + i] {
            if let Some(name) = c_str_to_string(unsafe { libc::nl_langinfo(item) }) {
                names.push((rank, name));
            }
        }
    }
    names
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn read_month_names() -> Vec<(i16, String)> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_locale_is_byte_order() {
        let data = LocaleData::c();
        assert_eq!(data.collation, Collation::Bytes);
        assert_eq!(data.collation.compare("B", "a"), Ordering::Less);
        assert_eq!(data.number.decimal_point, '.');
        assert_eq!(data.number.group_separator, None);
    }

    #[test]
    fn test_resolve_c_specs_skips_libc() {
        let data = LocaleData::resolve(&LocaleSpec::C, &LocaleSpec::C, true).unwrap();
        assert_eq!(data.collation, Collation::Bytes);
        assert!(data.number.lenient);
    }

    #[test]
    fn test_locale_spec_parse() {
        assert_eq!(LocaleSpec::parse("none"), LocaleSpec::C);
        assert_eq!(LocaleSpec::parse(" default "), LocaleSpec::Environment);
        assert_eq!(
            LocaleSpec::parse("fr_FR.UTF-8"),
            LocaleSpec::Named("fr_FR.UTF-8".to_string())
        );
    }

    #[test]
    fn test_month_lookup() {
        let months = MonthTable::english();
        assert_eq!(months.lookup("jan"), 1);
        assert_eq!(months.lookup("December"), 12);
        assert_eq!(months.lookup("SEPT"), 0);
        assert_eq!(months.lookup(""), 0);
    }

    #[test]
    fn test_localized_abbreviation_drops_dot() {
        let mut months = MonthTable::english();
        months.insert("janv.", 1);
        assert_eq!(months.lookup("JANV"), 1);
    }

    #[test]
    fn test_lenient_group_separators() {
        let strict = NumberFormat {
            decimal_point: ',',
            group_separator: Some('\u{a0}'),
            lenient: false,
        };
        assert!(strict.is_group_separator('\u{a0}', Some('1')));
        assert!(!strict.is_group_separator(' ', Some('1')));
        assert!(!strict.is_group_separator('.', Some('1')));

        let lenient = NumberFormat { lenient: true, ..strict };
        assert!(lenient.is_group_separator(' ', Some('1')));
        assert!(!lenient.is_group_separator(' ', Some('x')));
        assert!(lenient.is_group_separator('.', None));
    }

    #[test]
    fn test_strcoll_identical() {
        assert_eq!(strcoll_compare(b"apple", b"apple"), Ordering::Equal);
    }
}
