//! Library version accessors.
//!
//! The packed number stores one byte per part:
//! `major << 24 | minor << 16 | patch << 8 | revision`.

const NAME: &str = env!("CARGO_PKG_NAME");
const MAJOR: u32 = parse(env!("CARGO_PKG_VERSION_MAJOR"));
const MINOR: u32 = parse(env!("CARGO_PKG_VERSION_MINOR"));
const PATCH: u32 = parse(env!("CARGO_PKG_VERSION_PATCH"));
// Numeric suffix of the pre-release tag ("rc.3" -> 3), 0 for releases.
const REVISION: u32 = parse(env!("CARGO_PKG_VERSION_PRE"));

// Reads the trailing run of ASCII digits.
const fn parse(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut start = bytes.len();
    while start > 0 && bytes[start - 1].is_ascii_digit() {
        start -= 1;
    }
    let mut value = 0u32;
    let mut i = start;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}

/// `name@major.minor.patch.revision`
#[must_use]
pub fn string() -> String {
    format!("{NAME}@{MAJOR}.{MINOR}.{PATCH}.{REVISION}")
}

/// The packed 32-bit version number
#[must_use]
pub const fn number() -> u32 {
    ((MAJOR & 0xff) << 24) | ((MINOR & 0xff) << 16) | ((PATCH & 0xff) << 8) | (REVISION & 0xff)
}

/// Major version part
#[must_use]
pub const fn major() -> u32 {
    (number() >> 24) & 0xff
}

/// Minor version part
#[must_use]
pub const fn minor() -> u32 {
    (number() >> 16) & 0xff
}

/// Patch version part
#[must_use]
pub const fn patch() -> u32 {
    (number() >> 8) & 0xff
}

/// Revision part
#[must_use]
pub const fn revision() -> u32 {
    number() & 0xff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_round_trip_through_number() {
        assert_eq!(major(), MAJOR);
        assert_eq!(minor(), MINOR);
        assert_eq!(patch(), PATCH);
        assert_eq!(revision(), REVISION);
    }

    #[test]
    fn string_names_the_crate() {
        let version = string();
        assert!(version.starts_with("tether-resource@"));
        assert_eq!(version.matches('.').count(), 3);
    }

    #[test]
    fn parse_trailing_digits() {
        assert_eq!(parse(""), 0);
        assert_eq!(parse("12"), 12);
        assert_eq!(parse("rc.3"), 3);
        assert_eq!(parse("beta"), 0);
    }
}
