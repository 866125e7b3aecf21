//! Typed sort keys extracted from a line

/// SI suffixes understood by human-numeric keys, lowest rank first
pub const SI_SUFFIXES: &str = "KMGTPEZY";

/// Text of a key: a byte span of the owning line, or a transformed copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextKey {
    /// `line[start..limit]`, both on character boundaries
    Span { start: u32, limit: u32 },
    /// Result of `-d`/`-i`/`-f` filtering
    Owned(String),
}

impl TextKey {
    /// Build a span, falling back to a copy when offsets overflow `u32`
    pub fn span(line: &str, start: usize, limit: usize) -> Self {
        match (u32::try_from(start), u32::try_from(limit)) {
            (Ok(start), Ok(limit)) => TextKey::Span { start, limit },
            _ => TextKey::Owned(line[start..limit].to_string()),
        }
    }

    /// The key text within `line`
    pub fn resolve<'a>(&'a self, line: &'a str) -> &'a str {
        match self {
            TextKey::Span { start, limit } => line
                .get(*start as usize..*limit as usize)
                .unwrap_or_default(),
            TextKey::Owned(text) => text,
        }
    }
}

/// Classes of a general-numeric key, ordered lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FloatClass {
    Invalid = -2,
    NaN = -1,
    Number = 0,
}

impl FloatClass {
    pub fn code(self) -> i16 {
        self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            -2 => Some(FloatClass::Invalid),
            -1 => Some(FloatClass::NaN),
            0 => Some(FloatClass::Number),
            _ => None,
        }
    }
}

/// A decimal number kept as digit strings.
///
/// `sign_magnitude` is `rank` for non-negative numbers and `-(rank + 1)` for
/// negative ones, where `rank` is 0 without an SI suffix and 1..=8 for `K`..`Y`.
/// Ordering by `sign_magnitude` alone therefore orders signs and suffixes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecimalKey {
    pub sign_magnitude: i16,
    /// ASCII digits with leading zeros removed; `"0"` if only zeros were seen
    pub integral: Vec<u8>,
    /// ASCII digits after the decimal point, trailing zeros kept
    pub fractional: Vec<u8>,
}

impl DecimalKey {
    pub fn new(negative: bool, si_rank: i16, integral: Vec<u8>, fractional: Vec<u8>) -> Self {
        let sign_magnitude = if negative { -(si_rank + 1) } else { si_rank };
        Self {
            sign_magnitude,
            integral,
            fractional,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.sign_magnitude < 0
    }

    /// True when no digit at all was found
    pub fn is_empty(&self) -> bool {
        self.integral.is_empty() && self.fractional.is_empty()
    }

    /// SI suffix rank, 0 when absent
    pub fn si_rank(&self) -> i16 {
        if self.is_negative() {
            -self.sign_magnitude - 1
        } else {
            self.sign_magnitude
        }
    }
}

/// One decoded key, shaped by the key's sort kind
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedKey {
    Text(TextKey),
    GeneralNumeric { class: FloatClass, value: f64 },
    Numeric(DecimalKey),
    HumanNumeric(DecimalKey),
    /// 1..=12, or 0 when the text is not a month
    Month(i16),
    Random { digest: Vec<u8>, text: TextKey },
    Version(String),
}

impl ExtractedKey {
    /// Short name used in trace output
    pub fn kind_name(&self) -> &'static str {
        match self {
            ExtractedKey::Text(_) => "text",
            ExtractedKey::GeneralNumeric { .. } => "general-numeric",
            ExtractedKey::Numeric(_) => "numeric",
            ExtractedKey::HumanNumeric(_) => "human-numeric",
            ExtractedKey::Month(_) => "month",
            ExtractedKey::Random { .. } => "random",
            ExtractedKey::Version(_) => "version",
        }
    }
}

/// A line with its input position and precomputed keys
#[derive(Debug, Clone, PartialEq)]
pub struct DecoratedLine {
    /// Position in the whole input, strictly increasing
    pub sequence: u64,
    pub line: String,
    /// One entry per configured key
    pub keys: Vec<ExtractedKey>,
}

impl DecoratedLine {
    /// Rough in-memory footprint, used for trace output only
    pub fn approximate_size(&self) -> usize {
        let keys: usize = self
            .keys
            .iter()
            .map(|key| match key {
                ExtractedKey::Text(TextKey::Owned(text)) | ExtractedKey::Version(text) => {
                    text.len()
                }
                ExtractedKey::Numeric(d) | ExtractedKey::HumanNumeric(d) => {
                    d.integral.len() + d.fractional.len()
                }
                ExtractedKey::Random { digest, .. } => digest.len(),
                _ => 0,
            } + std::mem::size_of::<ExtractedKey>())
            .sum();
        self.line.len() + keys + std::mem::size_of::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_resolves_against_line() {
        let line = "alpha beta";
        let key = TextKey::span(line, 6, 10);
        assert_eq!(key.resolve(line), "beta");
        assert_eq!(TextKey::Owned("X".into()).resolve(line), "X");
    }

    #[test]
    fn test_sign_magnitude_orders_signs_and_suffixes() {
        let neg_kilo = DecimalKey::new(true, 1, b"1".to_vec(), vec![]);
        let neg_plain = DecimalKey::new(true, 0, b"5".to_vec(), vec![]);
        let plain = DecimalKey::new(false, 0, b"5".to_vec(), vec![]);
        let kilo = DecimalKey::new(false, 1, b"1".to_vec(), vec![]);
        assert!(neg_kilo.sign_magnitude < neg_plain.sign_magnitude);
        assert!(neg_plain.sign_magnitude < plain.sign_magnitude);
        assert!(plain.sign_magnitude < kilo.sign_magnitude);
        assert_eq!(neg_kilo.si_rank(), 1);
        assert_eq!(kilo.si_rank(), 1);
        assert!(neg_plain.is_negative());
    }

    #[test]
    fn test_float_class_order() {
        assert!(FloatClass::Invalid < FloatClass::NaN);
        assert!(FloatClass::NaN < FloatClass::Number);
        assert_eq!(FloatClass::from_code(FloatClass::NaN.code()), Some(FloatClass::NaN));
        assert_eq!(FloatClass::from_code(7), None);
    }
}
