use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const WORD_SIZE: u64 = 8;

/// Unit of a [`Size`]. Word based units are multiples of an 8 byte word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Magnitude {
    Bytes,
    Kilo,
    Mega,
    Giga,
    Tera,
    Peta,
    Word,
    KiloWord,
    MegaWord,
    GigaWord,
    TeraWord,
    PetaWord,
}

impl Magnitude {
    pub fn multiplier(self) -> u64 {
        match self {
            Magnitude::Bytes => 1,
            Magnitude::Kilo => 1 << 10,
            Magnitude::Mega => 1 << 20,
            Magnitude::Giga => 1 << 30,
            Magnitude::Tera => 1 << 40,
            Magnitude::Peta => 1 << 50,
            Magnitude::Word => WORD_SIZE,
            Magnitude::KiloWord => WORD_SIZE << 10,
            Magnitude::MegaWord => WORD_SIZE << 20,
            Magnitude::GigaWord => WORD_SIZE << 30,
            Magnitude::TeraWord => WORD_SIZE << 40,
            Magnitude::PetaWord => WORD_SIZE << 50,
        }
    }

    /// Suffix understood by PBS when the value is written back.
    pub fn suffix(self) -> &'static str {
        match self {
            Magnitude::Bytes => "b",
            Magnitude::Kilo => "kb",
            Magnitude::Mega => "mb",
            Magnitude::Giga => "gb",
            Magnitude::Tera => "tb",
            Magnitude::Peta => "pb",
            Magnitude::Word => "w",
            Magnitude::KiloWord => "kw",
            Magnitude::MegaWord => "mw",
            Magnitude::GigaWord => "gw",
            Magnitude::TeraWord => "tw",
            Magnitude::PetaWord => "pw",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        let magnitude = match suffix.to_ascii_lowercase().as_str() {
            "" | "b" => Magnitude::Bytes,
            "k" | "kb" => Magnitude::Kilo,
            "m" | "mb" => Magnitude::Mega,
            "g" | "gb" => Magnitude::Giga,
            "t" | "tb" => Magnitude::Tera,
            "p" | "pb" => Magnitude::Peta,
            "w" => Magnitude::Word,
            "kw" => Magnitude::KiloWord,
            "mw" => Magnitude::MegaWord,
            "gw" => Magnitude::GigaWord,
            "tw" => Magnitude::TeraWord,
            "pw" => Magnitude::PetaWord,
            _ => return None,
        };
        Some(magnitude)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Could not parse '{0}' as type size (e.g. 1mb)")]
pub struct SizeParseError(String);

/// Amount of memory (or disk) expressed as a value in a given magnitude.
///
/// The magnitude is kept so that the size can be written back in the same unit it was read.
/// Comparisons and arithmetic are done on bytes.
#[derive(Debug, Clone, Copy)]
pub struct Size {
    value: f64,
    magnitude: Magnitude,
}

impl Size {
    pub fn new(value: f64, magnitude: Magnitude) -> Self {
        Self { value, magnitude }
    }

    pub fn from_bytes(bytes: f64) -> Self {
        Self::new(bytes, Magnitude::Bytes)
    }

    pub fn gigabytes(value: f64) -> Self {
        Self::new(value, Magnitude::Giga)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn magnitude(&self) -> Magnitude {
        self.magnitude
    }

    pub fn bytes(&self) -> f64 {
        self.value * self.magnitude.multiplier() as f64
    }

    /// Converts a byte amount into this size's magnitude.
    fn with_bytes(&self, bytes: f64) -> Size {
        Size::new(bytes / self.magnitude.multiplier() as f64, self.magnitude)
    }

    pub fn sub(&self, other: &Size) -> Size {
        self.with_bytes(self.bytes() - other.bytes())
    }

    pub fn add(&self, other: &Size) -> Size {
        self.with_bytes(self.bytes() + other.bytes())
    }

    pub fn scale(&self, factor: f64) -> Size {
        Size::new(self.value * factor, self.magnitude)
    }

    /// PBS sizes do not support decimals.
    pub fn to_pbs_string(&self) -> String {
        format!("{}{}", self.value as i64, self.magnitude.suffix())
    }
}

impl PartialEq for Size {
    fn eq(&self, other: &Self) -> bool {
        self.bytes() == other.bytes()
    }
}

impl PartialOrd for Size {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.bytes().partial_cmp(&other.bytes())
    }
}

impl FromStr for Size {
    type Err = SizeParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        let split = trimmed
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(trimmed.len());
        let (number, suffix) = trimmed.split_at(split);
        let value = number
            .parse::<f64>()
            .map_err(|_| SizeParseError(input.to_string()))?;
        let magnitude =
            Magnitude::from_suffix(suffix).ok_or_else(|| SizeParseError(input.to_string()))?;
        if !value.is_finite() {
            return Err(SizeParseError(input.to_string()));
        }
        Ok(Size::new(value, magnitude))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.fract() == 0.0 {
            write!(f, "{}{}", self.value as i64, self.magnitude.suffix())
        } else {
            write!(f, "{:.2}{}", self.value, self.magnitude.suffix())
        }
    }
}

impl Serialize for Size {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Size {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(input: &str) -> f64 {
        input.parse::<Size>().unwrap().bytes()
    }

    #[test]
    fn test_parse_byte_magnitudes() {
        assert_eq!(bytes("100"), 100.0);
        assert_eq!(bytes("100b"), 100.0);
        assert_eq!(bytes("1k"), 1024.0);
        assert_eq!(bytes("1kb"), 1024.0);
        assert_eq!(bytes("2mb"), 2.0 * 1024.0 * 1024.0);
        assert_eq!(bytes("1GB"), 1024.0 * 1024.0 * 1024.0);
        assert_eq!(bytes("1t"), (1u64 << 40) as f64);
        assert_eq!(bytes("1pb"), (1u64 << 50) as f64);
        assert_eq!(bytes("1.5gb"), 1.5 * (1u64 << 30) as f64);
    }

    #[test]
    fn test_parse_word_magnitudes() {
        assert_eq!(bytes("1w"), 8.0);
        assert_eq!(bytes("1kw"), 8.0 * 1024.0);
        assert_eq!(bytes("1mw"), 8.0 * (1u64 << 20) as f64);
        assert_eq!(bytes("1gw"), 8.0 * (1u64 << 30) as f64);
        assert_eq!(bytes("1tw"), 8.0 * (1u64 << 40) as f64);
        assert_eq!(bytes("1pw"), 8.0 * (1u64 << 50) as f64);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<Size>().is_err());
        assert!("gb".parse::<Size>().is_err());
        assert!("1xb".parse::<Size>().is_err());
        assert!("1gbb".parse::<Size>().is_err());
    }

    #[test]
    fn test_compare_across_magnitudes() {
        let a: Size = "1gb".parse().unwrap();
        let b: Size = "1024mb".parse().unwrap();
        assert_eq!(a, b);
        assert!("25g".parse::<Size>().unwrap() < "50g".parse::<Size>().unwrap());
    }

    #[test]
    fn test_sub_keeps_magnitude() {
        let total: Size = "50gb".parse().unwrap();
        let used: Size = "25600mb".parse().unwrap();
        let left = total.sub(&used);
        assert_eq!(left.magnitude(), Magnitude::Giga);
        assert_eq!(left.value(), 25.0);
    }

    #[test]
    fn test_pbs_string_truncates() {
        assert_eq!(Size::new(1.75, Magnitude::Giga).to_pbs_string(), "1gb");
        assert_eq!(Size::new(16.0, Magnitude::Word).to_pbs_string(), "16w");
    }
}
