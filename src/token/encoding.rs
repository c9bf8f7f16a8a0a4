//! Alphabet encoders that turn raw random bytes into token text.
//!
//! Four formats are supported:
//!
//! | Format      | Output                                   | Text length for `n` |
//! |-------------|------------------------------------------|---------------------|
//! | `hex`       | lowercase hexadecimal                    | `2n`                |
//! | `base64url` | RFC 4648 §5 alphabet, no padding         | `⌈4n/3⌉`            |
//! | `base64`    | RFC 4648 §4 alphabet, padded             | `4⌈n/3⌉`            |
//! | `custom`    | `n` characters from a caller alphabet    | `n` (+ separators)  |
//!
//! # Custom alphabets
//!
//! Each custom character consumes four raw bytes, read as a big-endian `u32`
//! `r`, and selects `alphabet[(r * m) >> 32]` where `m` is the alphabet size.
//! The probability of any index differs from `1/m` by at most `m / 2^32`,
//! which stays below `6e-8` for the largest allowed alphabet, so no rejection
//! loop (and no second entropy draw) is needed. Callers size their entropy
//! draw with [`Format::entropy_len`].

use crate::TokenError;
use base64::Engine;
use std::fmt;
use std::str::FromStr;

/// The grouping separator inserted into custom-alphabet output.
pub const GROUP_SEPARATOR: char = '-';

/// Smallest allowed custom alphabet.
pub const ALPHABET_MIN_SIZE: usize = 2;

/// Largest allowed custom alphabet.
pub const ALPHABET_MAX_SIZE: usize = 256;

/// Largest allowed grouping stride.
pub const GROUPING_MAX: usize = 128;

const CUSTOM_BYTES_PER_CHAR: usize = 4;

/// Output format of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    /// Lowercase hexadecimal.
    Hex,
    /// URL-safe base64 without padding.
    #[default]
    Base64Url,
    /// Standard padded base64.
    Base64,
    /// Characters drawn from a configured alphabet.
    Custom,
}

impl Format {
    /// Number of raw random bytes needed for a token of `length`.
    pub fn entropy_len(&self, length: usize) -> usize {
        match self {
            Format::Custom => length * CUSTOM_BYTES_PER_CHAR,
            _ => length,
        }
    }

    /// Expected text length of an encoded token, separators included.
    pub fn encoded_len(&self, length: usize, grouping: usize) -> usize {
        match self {
            Format::Hex => length * 2,
            Format::Base64Url => (length * 4).div_ceil(3),
            Format::Base64 => length.div_ceil(3) * 4,
            Format::Custom => length + separator_count(length, grouping),
        }
    }

    /// Canonical option name of this format.
    pub fn as_str(&self) -> &'static str {
        match self {
            Format::Hex => "hex",
            Format::Base64Url => "base64url",
            Format::Base64 => "base64",
            Format::Custom => "custom",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Format {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(Format::Hex),
            "base64url" => Ok(Format::Base64Url),
            "base64" => Ok(Format::Base64),
            "custom" => Ok(Format::Custom),
            other => Err(TokenError::InvalidConfig(format!(
                "format must be one of: hex, base64url, base64, custom (got '{other}')"
            ))),
        }
    }
}

/// A validated custom alphabet.
///
/// Holds between [`ALPHABET_MIN_SIZE`] and [`ALPHABET_MAX_SIZE`] distinct
/// characters, none of which is the [`GROUP_SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    source: String,
    chars: Vec<char>,
}

impl Alphabet {
    /// Validates and wraps an alphabet string.
    ///
    /// # Example
    ///
    /// ```rust
    /// use request_token::encoding::Alphabet;
    ///
    /// let crockford = Alphabet::new("0123456789ABCDEFGHJKMNPQRSTVWXYZ")?;
    /// assert_eq!(crockford.len(), 32);
    ///
    /// assert!(Alphabet::new("AAB").is_err());
    /// # Ok::<(), request_token::TokenError>(())
    /// ```
    pub fn new(alphabet: &str) -> Result<Self, TokenError> {
        let chars: Vec<char> = alphabet.chars().collect();

        if chars.len() < ALPHABET_MIN_SIZE {
            return Err(TokenError::InvalidConfig(format!(
                "alphabet must contain at least {ALPHABET_MIN_SIZE} characters"
            )));
        }
        if chars.len() > ALPHABET_MAX_SIZE {
            return Err(TokenError::InvalidConfig(format!(
                "alphabet too long (max {ALPHABET_MAX_SIZE} characters)"
            )));
        }
        if chars.contains(&GROUP_SEPARATOR) {
            return Err(TokenError::InvalidConfig(format!(
                "alphabet must not contain the grouping separator '{GROUP_SEPARATOR}'"
            )));
        }
        for (i, c) in chars.iter().enumerate() {
            if chars[..i].contains(c) {
                return Err(TokenError::InvalidConfig(format!(
                    "alphabet has duplicate character '{c}' at position {i}"
                )));
            }
        }

        Ok(Self {
            source: alphabet.to_string(),
            chars,
        })
    }

    /// Number of characters in the alphabet.
    pub fn len(&self) -> usize {
        self.chars.len()
    }

    /// Always false: a valid alphabet has at least two characters.
    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Whether `c` belongs to the alphabet.
    pub fn contains(&self, c: char) -> bool {
        self.chars.contains(&c)
    }

    /// The alphabet as configured.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn pick(&self, r: u32) -> char {
        let index = ((r as u64 * self.chars.len() as u64) >> 32) as usize;
        self.chars[index]
    }
}

/// Encode bytes as lowercase hexadecimal.
pub fn encode_hex(raw: &[u8]) -> String {
    hex::encode(raw)
}

/// Encode bytes as URL-safe base64 without padding.
pub fn encode_base64url(raw: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

/// Encode bytes as standard padded base64.
pub fn encode_base64(raw: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Encode bytes with a custom alphabet, four raw bytes per character.
///
/// A `grouping` of `k > 0` inserts [`GROUP_SEPARATOR`] after every `k`-th
/// character except the last one. Trailing bytes that do not fill a whole
/// character are ignored.
pub fn encode_custom(raw: &[u8], alphabet: &Alphabet, grouping: usize) -> String {
    let length = raw.len() / CUSTOM_BYTES_PER_CHAR;
    let mut out = String::with_capacity(length + separator_count(length, grouping));

    for (i, chunk) in raw.chunks_exact(CUSTOM_BYTES_PER_CHAR).enumerate() {
        let r = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        out.push(alphabet.pick(r));

        let written = i + 1;
        if grouping > 0 && written % grouping == 0 && written < length {
            out.push(GROUP_SEPARATOR);
        }
    }

    out
}

/// Encode raw random bytes in the requested format.
///
/// # Errors
///
/// - `InvalidConfig` if `raw` is empty (a zero-length token)
/// - `InvalidConfig` if `format` is `Custom` and no alphabet is given, or
///   `raw` is not a whole number of characters
pub fn encode(
    raw: &[u8],
    format: Format,
    alphabet: Option<&Alphabet>,
    grouping: usize,
) -> Result<String, TokenError> {
    if raw.is_empty() {
        return Err(TokenError::InvalidConfig(
            "token length must be at least 1".to_string(),
        ));
    }

    match format {
        Format::Hex => Ok(encode_hex(raw)),
        Format::Base64Url => Ok(encode_base64url(raw)),
        Format::Base64 => Ok(encode_base64(raw)),
        Format::Custom => {
            let alphabet = alphabet.ok_or_else(|| {
                TokenError::InvalidConfig("custom format requires an alphabet".to_string())
            })?;
            if raw.len() % CUSTOM_BYTES_PER_CHAR != 0 {
                return Err(TokenError::InvalidConfig(format!(
                    "custom format consumes {CUSTOM_BYTES_PER_CHAR} raw bytes per character"
                )));
            }
            Ok(encode_custom(raw, alphabet, grouping))
        }
    }
}

fn separator_count(length: usize, grouping: usize) -> usize {
    if grouping == 0 || length == 0 {
        0
    } else {
        (length - 1) / grouping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::entropy::{OsEntropy, random_bytes};

    #[test]
    fn test_hex_encoding_basic() {
        assert_eq!(encode_hex(&[0x00, 0xFF, 0xAB, 0xCD]), "00ffabcd");
        assert_eq!(encode_hex(&[0x42]), "42");
    }

    #[test]
    fn test_base64url_has_no_padding_or_unsafe_chars() {
        let encoded = encode_base64url(b"Hello, World!");
        assert_eq!(encoded, "SGVsbG8sIFdvcmxkIQ");
        assert!(!encoded.contains('='));
        assert!(!encoded.contains('+'));
        assert!(!encoded.contains('/'));
    }

    #[test]
    fn test_base64_is_padded() {
        assert_eq!(encode_base64(b"Hello, World!"), "SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn test_zero_length_rejected() {
        for format in [Format::Hex, Format::Base64Url, Format::Base64] {
            let result = encode(&[], format, None, 0);
            assert!(matches!(result, Err(TokenError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_exact_lengths_for_every_valid_length() {
        let alphabet = Alphabet::new("0123456789ABCDEFGHJKMNPQRSTVWXYZ").unwrap();
        for length in 1..=1024 {
            for format in [Format::Hex, Format::Base64Url, Format::Base64, Format::Custom] {
                let raw = random_bytes(&OsEntropy, format.entropy_len(length)).unwrap();
                let text = encode(&raw, format, Some(&alphabet), 0).unwrap();
                assert_eq!(
                    text.chars().count(),
                    format.encoded_len(length, 0),
                    "format {format} length {length}"
                );
            }
        }
    }

    #[test]
    fn test_custom_alphabet_membership() {
        let alphabets = ["AB", "ABCD", "0123456789", "abcdefghijklmnopqrstuvwxyz", "αβγδε"];
        for source in alphabets {
            let alphabet = Alphabet::new(source).unwrap();
            let raw = random_bytes(&OsEntropy, Format::Custom.entropy_len(200)).unwrap();
            let text = encode_custom(&raw, &alphabet, 0);
            assert_eq!(text.chars().count(), 200);
            assert!(text.chars().all(|c| alphabet.contains(c)), "{text}");
        }
    }

    #[test]
    fn test_custom_grouping() {
        let alphabet = Alphabet::new("0123456789ABCDEF").unwrap();
        let raw = random_bytes(&OsEntropy, Format::Custom.entropy_len(8)).unwrap();
        let text = encode_custom(&raw, &alphabet, 4);

        assert_eq!(text.len(), 9);
        assert_eq!(text.chars().nth(4), Some(GROUP_SEPARATOR));
        assert!(!text.ends_with(GROUP_SEPARATOR));
        let stripped: String = text.chars().filter(|c| *c != GROUP_SEPARATOR).collect();
        assert_eq!(stripped.len(), 8);
        assert!(stripped.chars().all(|c| alphabet.contains(c)));
    }

    #[test]
    fn test_custom_grouping_lengths() {
        let alphabet = Alphabet::new("XY").unwrap();
        for (length, grouping) in [(1, 1), (5, 5), (6, 5), (10, 3), (12, 4), (7, 128)] {
            let raw = random_bytes(&OsEntropy, Format::Custom.entropy_len(length)).unwrap();
            let text = encode_custom(&raw, &alphabet, grouping);
            assert_eq!(text.len(), Format::Custom.encoded_len(length, grouping));
            assert!(!text.starts_with(GROUP_SEPARATOR));
            assert!(!text.ends_with(GROUP_SEPARATOR));
        }
    }

    #[test]
    fn test_custom_mapping_covers_range() {
        let alphabet = Alphabet::new("ABC").unwrap();
        assert_eq!(alphabet.pick(0), 'A');
        assert_eq!(alphabet.pick(u32::MAX), 'C');
        assert_eq!(alphabet.pick(u32::MAX / 2), 'B');
    }

    #[test]
    fn test_custom_distribution_is_near_uniform() {
        let alphabet = Alphabet::new("0123456789").unwrap();
        let raw = random_bytes(&OsEntropy, Format::Custom.entropy_len(20_000)).unwrap();
        let text = encode_custom(&raw, &alphabet, 0);

        let mut counts = [0usize; 10];
        for c in text.chars() {
            counts[c.to_digit(10).unwrap() as usize] += 1;
        }
        // Expected 2000 each; allow a generous statistical margin.
        for count in counts {
            assert!((1700..=2300).contains(&count), "{counts:?}");
        }
    }

    #[test]
    fn test_custom_requires_alphabet() {
        let result = encode(&[1, 2, 3, 4], Format::Custom, None, 0);
        assert!(matches!(result, Err(TokenError::InvalidConfig(_))));
    }

    #[test]
    fn test_alphabet_validation() {
        assert!(Alphabet::new("").is_err());
        assert!(Alphabet::new("A").is_err());
        assert!(Alphabet::new("AA").is_err());
        assert!(Alphabet::new("AB-").is_err());
        let too_long: String = (0..300u32).filter_map(char::from_u32).filter(|c| *c != '-').collect();
        assert!(Alphabet::new(&too_long).is_err());
        assert!(Alphabet::new("AB").is_ok());
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("HEX".parse::<Format>().unwrap(), Format::Hex);
        assert_eq!("base64url".parse::<Format>().unwrap(), Format::Base64Url);
        assert_eq!("Base64".parse::<Format>().unwrap(), Format::Base64);
        assert_eq!("custom".parse::<Format>().unwrap(), Format::Custom);
        assert!(matches!(
            "base32".parse::<Format>(),
            Err(TokenError::InvalidConfig(_))
        ));
        assert_eq!(Format::default(), Format::Base64Url);
    }
}
