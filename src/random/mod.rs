//! Cryptographically secure random values.
//!
//! # Responsibilities
//! - Random bytes from the OS CSPRNG
//! - Random strings over fixed character domains
//! - Random unsigned integers and fixed-length hex
//! - Memoized Fibonacci numbers (see [`fibonacci`])
//!
//! # Design Decisions
//! - Every call draws from `OsRng`; there is no userspace generator to seed
//! - Domain mapping uses `byte % domain.len()`, so domains that do not divide
//!   256 are slightly biased
//! - Entropy failure is an error, never a panic

mod fibonacci;

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

pub use fibonacci::{fibonacci, MAX_FIBONACCI_INDEX};

/// Decimal digits.
pub const NUMBER: &[u8] = b"0123456789";
/// ASCII letters, upper case first.
pub const ALPHA: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
/// Digits followed by letters.
pub const ALPHANUM: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
/// The 95 printable 7-bit characters, space through `~`.
pub const SPECIAL: &[u8; 95] = &printable_ascii();

const fn printable_ascii() -> [u8; 95] {
    let mut table = [0u8; 95];
    let mut i = 0;
    while i < 95 {
        table[i] = 32 + i as u8;
        i += 1;
    }
    table
}

/// Error type for random generation.
#[derive(Debug, Error)]
pub enum RandomError {
    /// The OS random source failed.
    #[error("entropy source failed: {0}")]
    Entropy(#[source] rand::Error),
    /// A string was requested over an empty character domain.
    #[error("character domain is empty")]
    EmptyDomain,
    /// Fibonacci numbers are only defined for non-negative indices.
    #[error("unable to calculate the Fibonacci number for a negative index such as {0}")]
    NegativeIndex(i64),
    /// The requested Fibonacci number does not fit in a u64.
    #[error("Fibonacci number at index {0} overflows u64")]
    Overflow(i64),
}

/// `len` bytes from the OS CSPRNG.
pub fn bytes(len: usize) -> Result<Vec<u8>, RandomError> {
    let mut buf = vec![0u8; len];
    OsRng.try_fill_bytes(&mut buf).map_err(RandomError::Entropy)?;
    Ok(buf)
}

/// A random string of `len` characters drawn from `domain`.
///
/// With no domain the result is the URL-safe base64 encoding of `len` random
/// bytes, which is longer than `len`.
pub fn string(domain: Option<&[u8]>, len: usize) -> Result<String, RandomError> {
    let Some(domain) = domain else {
        return Ok(URL_SAFE.encode(bytes(len)?));
    };
    if domain.is_empty() {
        return Err(RandomError::EmptyDomain);
    }

    let picked: Vec<u8> = bytes(len)?
        .into_iter()
        .map(|b| domain[b as usize % domain.len()])
        .collect();
    Ok(String::from_utf8_lossy(&picked).into_owned())
}

pub fn number(len: usize) -> Result<String, RandomError> {
    string(Some(NUMBER), len)
}

pub fn alpha(len: usize) -> Result<String, RandomError> {
    string(Some(ALPHA), len)
}

pub fn alphanum(len: usize) -> Result<String, RandomError> {
    string(Some(ALPHANUM), len)
}

pub fn special(len: usize) -> Result<String, RandomError> {
    string(Some(SPECIAL), len)
}

/// URL-safe base64 of `len` random bytes.
pub fn any(len: usize) -> Result<String, RandomError> {
    string(None, len)
}

/// A random u64 from 8 big-endian bytes.
pub fn uint() -> Result<u64, RandomError> {
    let mut buf = [0u8; 8];
    OsRng.try_fill_bytes(&mut buf).map_err(RandomError::Entropy)?;
    Ok(u64::from_be_bytes(buf))
}

/// Exactly `len` lowercase hex characters.
pub fn hex(len: usize) -> Result<String, RandomError> {
    let mut encoded = ::hex::encode(bytes(len / 2 + 1)?);
    encoded.truncate(len);
    Ok(encoded)
}

/// Named character domains, as accepted by [`generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Number,
    Alpha,
    AlphaNum,
    Special,
    Any,
    Hex,
}

impl FromStr for Domain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "number" => Ok(Domain::Number),
            "alpha" => Ok(Domain::Alpha),
            "alphanum" => Ok(Domain::AlphaNum),
            "special" => Ok(Domain::Special),
            "any" => Ok(Domain::Any),
            "hex" => Ok(Domain::Hex),
            other => Err(format!("unknown domain: {other}")),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Domain::Number => "number",
            Domain::Alpha => "alpha",
            Domain::AlphaNum => "alphanum",
            Domain::Special => "special",
            Domain::Any => "any",
            Domain::Hex => "hex",
        };
        f.write_str(name)
    }
}

/// Generate a string of `len` over a named domain.
pub fn generate(domain: Domain, len: usize) -> Result<String, RandomError> {
    match domain {
        Domain::Number => number(len),
        Domain::Alpha => alpha(len),
        Domain::AlphaNum => alphanum(len),
        Domain::Special => special(len),
        Domain::Any => any(len),
        Domain::Hex => hex(len),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_in_domain(sample: &str, domain: &[u8]) {
        for b in sample.bytes() {
            assert!(domain.contains(&b), "{:?} not in domain", b as char);
        }
    }

    #[test]
    fn special_covers_printable_ascii() {
        assert_eq!(SPECIAL.len(), 95);
        assert_eq!(SPECIAL[0], b' ');
        assert_eq!(SPECIAL[94], b'~');
    }

    #[test]
    fn fixed_domain_functions_return_requested_length() {
        for len in (2..27).map(|i| fibonacci(i).unwrap() as usize) {
            assert_eq!(number(len).unwrap().len(), len);
            assert_eq!(alpha(len).unwrap().len(), len);
            assert_eq!(alphanum(len).unwrap().len(), len);
            assert_eq!(special(len).unwrap().len(), len);
            assert_eq!(hex(len).unwrap().len(), len);
        }
    }

    #[test]
    fn characters_stay_in_their_domain() {
        assert_in_domain(&number(500).unwrap(), NUMBER);
        assert_in_domain(&alpha(500).unwrap(), ALPHA);
        assert_in_domain(&alphanum(500).unwrap(), ALPHANUM);
        assert_in_domain(&special(500).unwrap(), SPECIAL);
        assert_in_domain(&hex(500).unwrap(), b"0123456789abcdef");

        let custom = b"`~!@#$%^&*()_+=-[{}];:,<.>/?|\"\\";
        assert_in_domain(&string(Some(custom), 500).unwrap(), custom);
    }

    #[test]
    fn any_is_url_safe_base64() {
        let encoded = any(30).unwrap();
        assert_eq!(encoded.len(), 40);
        assert_eq!(URL_SAFE.decode(&encoded).unwrap().len(), 30);
        assert!(!encoded.contains('+') && !encoded.contains('/'));
    }

    #[test]
    fn empty_domain_is_rejected() {
        assert!(matches!(string(Some(b""), 4), Err(RandomError::EmptyDomain)));
    }

    #[test]
    fn zero_length_is_empty() {
        assert_eq!(alphanum(0).unwrap(), "");
        assert_eq!(hex(0).unwrap(), "");
        assert!(bytes(0).unwrap().is_empty());
    }

    #[test]
    fn uint_varies() {
        let samples: Vec<u64> = (0..4).map(|_| uint().unwrap()).collect();
        assert!(samples.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn domain_names_parse() {
        assert_eq!("AlphaNum".parse::<Domain>().unwrap(), Domain::AlphaNum);
        assert_eq!("hex".parse::<Domain>().unwrap(), Domain::Hex);
        assert!("emoji".parse::<Domain>().is_err());
        assert_eq!(generate(Domain::Number, 8).unwrap().len(), 8);
    }
}
