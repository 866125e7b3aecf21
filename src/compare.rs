//! Multi-key line comparison

use crate::config::{KeyOptions, SortConfig};
use crate::key::{DecimalKey, DecoratedLine, ExtractedKey, FloatClass};
use crate::locale::Collation;
use std::cmp::Ordering;

/// Total ordering over decorated lines for one configuration.
///
/// Keys are compared left to right. When every key ties, a sorting comparator
/// with `stable` set orders by input sequence; `stable` or `unique` otherwise
/// make the lines equal; failing both, whole lines are compared as text.
#[derive(Debug, Clone)]
pub struct Comparator {
    keys: Vec<KeyOptions>,
    collation: Collation,
    /// Whole-line comparison when keys tie
    last_resort: bool,
    /// Input order as the final tie-break
    sequence: bool,
    reverse: bool,
    random_tie_break: bool,
}

impl Comparator {
    fn new(config: &SortConfig, collation: Collation, sequence_significant: bool) -> Self {
        let keyed = !config.keys.is_empty();
        Self {
            keys: config.keys.iter().map(|key| key.options).collect(),
            collation,
            last_resort: !keyed || (!config.stable && !config.unique),
            sequence: sequence_significant && config.stable,
            reverse: config.reverse,
            random_tie_break: config.random_tie_break,
        }
    }

    /// Ordering used while sorting: input order decides ties under `stable`
    pub fn for_sorting(config: &SortConfig, collation: Collation) -> Self {
        Self::new(config, collation, true)
    }

    /// Ordering used for merging, checking and duplicate detection
    pub fn for_validation(config: &SortConfig, collation: Collation) -> Self {
        Self::new(config, collation, false)
    }

    pub fn compare(&self, a: &DecoratedLine, b: &DecoratedLine) -> Ordering {
        self.compare_keys(a, b)
            .then_with(|| {
                if self.last_resort {
                    let ordering = self.collation.compare(&a.line, &b.line);
                    if self.reverse {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                } else {
                    Ordering::Equal
                }
            })
            .then_with(|| {
                if self.sequence {
                    a.sequence.cmp(&b.sequence)
                } else {
                    Ordering::Equal
                }
            })
    }

    /// Compare configured keys only, honoring per-key `reverse`
    pub fn compare_keys(&self, a: &DecoratedLine, b: &DecoratedLine) -> Ordering {
        for ((options, key_a), key_b) in self.keys.iter().zip(&a.keys).zip(&b.keys) {
            let ordering = self.compare_key(a, key_a, b, key_b);
            if ordering != Ordering::Equal {
                return if options.reverse {
                    ordering.reverse()
                } else {
                    ordering
                };
            }
        }
        Ordering::Equal
    }

    fn compare_key(
        &self,
        line_a: &DecoratedLine,
        a: &ExtractedKey,
        line_b: &DecoratedLine,
        b: &ExtractedKey,
    ) -> Ordering {
        match (a, b) {
            (ExtractedKey::Text(a), ExtractedKey::Text(b)) => self
                .collation
                .compare(a.resolve(&line_a.line), b.resolve(&line_b.line)),
            (
                ExtractedKey::GeneralNumeric { class, value },
                ExtractedKey::GeneralNumeric {
                    class: other_class,
                    value: other_value,
                },
            ) => compare_general_numeric(*class, *value, *other_class, *other_value),
            (ExtractedKey::Numeric(a), ExtractedKey::Numeric(b)) => compare_numeric(a, b),
            (ExtractedKey::HumanNumeric(a), ExtractedKey::HumanNumeric(b)) => {
                compare_human_numeric(a, b)
            }
            (ExtractedKey::Month(a), ExtractedKey::Month(b)) => a.cmp(b),
            (
                ExtractedKey::Random { digest, text },
                ExtractedKey::Random {
                    digest: other_digest,
                    text: other_text,
                },
            ) => digest.cmp(other_digest).then_with(|| {
                if self.random_tie_break {
                    self.collation
                        .compare(text.resolve(&line_a.line), other_text.resolve(&line_b.line))
                } else {
                    Ordering::Equal
                }
            }),
            (ExtractedKey::Version(a), ExtractedKey::Version(b)) => compare_versions(a, b),
            // Both lines were decorated by one extractor, so a position has one kind
            (a, b) => unreachable!("key kinds differ at one position: {a:?} vs {b:?}"),
        }
    }
}

/// Invalid < NaN < numbers; numbers by IEEE total order
pub fn compare_general_numeric(a_class: FloatClass, a: f64, b_class: FloatClass, b: f64) -> Ordering {
    a_class.cmp(&b_class).then_with(|| {
        if a_class == FloatClass::Number {
            a.total_cmp(&b)
        } else {
            Ordering::Equal
        }
    })
}

pub fn compare_numeric(a: &DecimalKey, b: &DecimalKey) -> Ordering {
    match (a.is_negative(), b.is_negative()) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (negative, _) => {
            let magnitude = match (a.is_empty(), b.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare_integral(&a.integral, &b.integral)
                    .then_with(|| compare_fractional(&a.fractional, &b.fractional)),
            };
            if negative {
                magnitude.reverse()
            } else {
                magnitude
            }
        }
    }
}

/// SI rank and sign first, then the number itself
pub fn compare_human_numeric(a: &DecimalKey, b: &DecimalKey) -> Ordering {
    a.sign_magnitude
        .cmp(&b.sign_magnitude)
        .then_with(|| compare_numeric(a, b))
}

fn compare_integral(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Digit by digit; past the shared length, extra zeros sort first and any
/// other extra digit makes the longer part larger (`2.00 < 2.0 < 2.05`)
fn compare_fractional(a: &[u8], b: &[u8]) -> Ordering {
    let shared = a.len().min(b.len());
    match a[..shared].cmp(&b[..shared]) {
        Ordering::Equal => {}
        ordering => return ordering,
    }
    let all_zeros = |digits: &[u8]| digits.iter().all(|&d| d == b'0');
    match a.len().cmp(&b.len()) {
        Ordering::Equal => Ordering::Equal,
        Ordering::Greater if all_zeros(&a[shared..]) => Ordering::Less,
        Ordering::Greater => Ordering::Greater,
        Ordering::Less if all_zeros(&b[shared..]) => Ordering::Greater,
        Ordering::Less => Ordering::Less,
    }
}

/// Ranking of a non-digit character in version comparison
fn version_order(c: Option<char>) -> i64 {
    match c {
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_alphabetic() => c as i64,
        Some('~') => -1,
        Some(c) => char::MAX as i64 + 1 + c as i64,
    }
}

fn is_version_suffix(s: &str) -> bool {
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '.' {
            return false;
        }
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '~' => {}
            _ => return false,
        }
        while chars
            .next_if(|c| c.is_ascii_alphanumeric() || *c == '~')
            .is_some()
        {}
    }
    true
}

/// Split off the trailing run of `.x` groups (`(\.[A-Za-z~][A-Za-z0-9~]*)*$`)
fn split_version_suffix(v: &str) -> (&str, &str) {
    let start = v
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| is_version_suffix(&v[i..]))
        .unwrap_or(v.len());
    v.split_at(start)
}

/// Alternating non-digit and digit run comparison
fn compare_version_parts(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let is_digit = |s: &[char], i: usize| s.get(i).map_or(false, char::is_ascii_digit);
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !is_digit(&a, i)) || (j < b.len() && !is_digit(&b, j)) {
            let (x, y) = (version_order(a.get(i).copied()), version_order(b.get(j).copied()));
            if x != y {
                return x.cmp(&y);
            }
            i = (i + 1).min(a.len());
            j = (j + 1).min(b.len());
        }

        while a.get(i) == Some(&'0') {
            i += 1;
        }
        while b.get(j) == Some(&'0') {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while is_digit(&a, i) && is_digit(&b, j) {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if is_digit(&a, i) {
            return Ordering::Greater;
        }
        if is_digit(&b, j) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

/// Version-number ordering in the style of `ls -v`/`sort -V`
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let plain = a.cmp(b);
    if plain == Ordering::Equal {
        return plain;
    }

    let special = |v: &str| match v {
        "" => Some(0),
        "." => Some(1),
        ".." => Some(2),
        _ => None,
    };
    match (special(a), special(b)) {
        (Some(x), Some(y)) => return x.cmp(&y),
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (None, None) => {}
    }

    let (a, b) = match (a.strip_prefix('.'), b.strip_prefix('.')) {
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (Some(a), Some(b)) => (a, b),
        (None, None) => (a, b),
    };

    let (a_prefix, a_suffix) = split_version_suffix(a);
    let (b_prefix, b_suffix) = split_version_suffix(b);
    compare_version_parts(a_prefix, b_prefix)
        .then_with(|| compare_version_parts(a_suffix, b_suffix))
        .then(plain)
}
