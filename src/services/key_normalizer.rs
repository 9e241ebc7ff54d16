//! Region-aware E.164 canonicalization of phone numbers

use tracing::debug;

use crate::errors::{AppError, AppResult};
use crate::models::LookupKey;
use crate::models::lookup::is_e164;

/// Dialing rules for one region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionRules {
    pub region: &'static str,
    pub calling_code: &'static str,
    /// Prefix dialed before national numbers inside the region
    pub trunk_prefix: Option<&'static str>,
    /// Prefix dialed before a country code when calling abroad
    pub international_prefix: &'static str,
    /// North American Numbering Plan member
    pub nanp: bool,
}

const fn rules(
    region: &'static str,
    calling_code: &'static str,
    trunk_prefix: Option<&'static str>,
    international_prefix: &'static str,
) -> RegionRules {
    RegionRules {
        region,
        calling_code,
        trunk_prefix,
        international_prefix,
        nanp: false,
    }
}

const fn nanp(region: &'static str) -> RegionRules {
    RegionRules {
        region,
        calling_code: "1",
        trunk_prefix: Some("1"),
        international_prefix: "011",
        nanp: true,
    }
}

static REGIONS: &[RegionRules] = &[
    nanp("US"),
    nanp("CA"),
    nanp("PR"),
    rules("GB", "44", Some("0"), "00"),
    rules("IE", "353", Some("0"), "00"),
    rules("DE", "49", Some("0"), "00"),
    rules("FR", "33", Some("0"), "00"),
    rules("NL", "31", Some("0"), "00"),
    rules("BE", "32", Some("0"), "00"),
    rules("CH", "41", Some("0"), "00"),
    rules("AT", "43", Some("0"), "00"),
    rules("SE", "46", Some("0"), "00"),
    rules("ES", "34", None, "00"),
    rules("IT", "39", None, "00"),
    rules("PT", "351", None, "00"),
    rules("NO", "47", None, "00"),
    rules("DK", "45", None, "00"),
    rules("PL", "48", None, "00"),
    rules("MX", "52", None, "00"),
    rules("RU", "7", Some("8"), "810"),
    rules("IN", "91", Some("0"), "00"),
    rules("CN", "86", Some("0"), "00"),
    rules("JP", "81", Some("0"), "010"),
    rules("AU", "61", Some("0"), "0011"),
    rules("NZ", "64", Some("0"), "00"),
    rules("BR", "55", Some("0"), "00"),
    rules("ZA", "27", Some("0"), "00"),
];

/// Characters people type between digit groups
fn is_separator(c: char) -> bool {
    matches!(c, ' ' | '\t' | '-' | '.' | '(' | ')' | '/')
}

/// Canonicalizes raw phone numbers to E.164 for one home region.
#[derive(Debug, Clone)]
pub struct KeyNormalizer {
    rules: RegionRules,
}

impl KeyNormalizer {
    pub fn new(region: &str) -> AppResult<Self> {
        let wanted = region.trim().to_ascii_uppercase();
        REGIONS
            .iter()
            .find(|r| r.region == wanted)
            .map(|rules| Self { rules: *rules })
            .ok_or_else(|| AppError::configuration(format!("Unsupported region '{region}'")))
    }

    pub fn region(&self) -> &'static str {
        self.rules.region
    }

    pub fn rules(&self) -> &RegionRules {
        &self.rules
    }

    /// Normalize `raw` to E.164. Already-canonical input comes back unchanged.
    pub fn normalize(&self, raw: &str) -> AppResult<LookupKey> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::invalid_argument("number", "must not be empty"));
        }

        let mut explicit_plus = false;
        let mut digits = String::with_capacity(trimmed.len());
        for c in trimmed.chars() {
            if c == '+' && !explicit_plus && digits.is_empty() {
                explicit_plus = true;
            } else if c.is_ascii_digit() {
                digits.push(c);
            } else if !is_separator(c) {
                return Err(AppError::invalid_key(
                    raw,
                    format!("unexpected character '{c}'"),
                ));
            }
        }

        if digits.is_empty() {
            return Err(AppError::invalid_key(raw, "no digits"));
        }

        let international = if explicit_plus {
            digits
        } else if let Some(rest) = digits.strip_prefix(self.rules.international_prefix) {
            rest.to_string()
        } else {
            let national = self.strip_trunk_prefix(&digits);
            if self.rules.nanp && national.len() != 10 {
                return Err(AppError::invalid_key(
                    raw,
                    format!("expected 10 national digits, found {}", national.len()),
                ));
            }
            format!("{}{}", self.rules.calling_code, national)
        };

        let canonical = format!("+{international}");
        if !is_e164(&canonical) {
            return Err(AppError::invalid_key(raw, "not a valid international number"));
        }

        debug!("Normalized '{}' to {} (region {})", raw, canonical, self.rules.region);
        Ok(LookupKey::from_canonical(canonical))
    }

    fn strip_trunk_prefix<'a>(&self, digits: &'a str) -> &'a str {
        match self.rules.trunk_prefix {
            // NANP numbers carry the trunk "1" only in front of a full 10-digit number
            Some(prefix) if self.rules.nanp => {
                if digits.len() == 11 {
                    digits.strip_prefix(prefix).unwrap_or(digits)
                } else {
                    digits
                }
            }
            Some(prefix) => digits.strip_prefix(prefix).unwrap_or(digits),
            None => digits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("US", "5551234567", "+15551234567")]
    #[case("US", "555-123-4567", "+15551234567")]
    #[case("US", "(555) 123-4567", "+15551234567")]
    #[case("US", "1 555 123 4567", "+15551234567")]
    #[case("US", "011 44 20 7946 0958", "+442079460958")]
    #[case("US", "+44 20 7946 0958", "+442079460958")]
    #[case("GB", "020 7946 0958", "+442079460958")]
    #[case("GB", "00 1 555 123 4567", "+15551234567")]
    #[case("DE", "030 1234567", "+49301234567")]
    #[case("IT", "06 1234 5678", "+390612345678")]
    #[case("AU", "0011 1 555 123 4567", "+15551234567")]
    #[case("ru", "8 495 123 45 67", "+74951234567")]
    fn normalizes_to_e164(#[case] region: &str, #[case] raw: &str, #[case] expected: &str) {
        let normalizer = KeyNormalizer::new(region).unwrap();
        assert_eq!(normalizer.normalize(raw).unwrap().as_str(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    fn empty_input_is_an_argument_error(#[case] raw: &str) {
        let normalizer = KeyNormalizer::new("US").unwrap();
        assert!(matches!(
            normalizer.normalize(raw),
            Err(AppError::InvalidArgument { .. })
        ));
    }

    #[rstest]
    #[case("call me")]
    #[case("555-CALL-NOW")]
    #[case("12345")]
    #[case("5+551234567")]
    #[case("+0123456")]
    #[case("---")]
    fn garbage_is_an_invalid_key(#[case] raw: &str) {
        let normalizer = KeyNormalizer::new("US").unwrap();
        assert!(matches!(
            normalizer.normalize(raw),
            Err(AppError::InvalidKey { .. })
        ));
    }

    #[test]
    fn unknown_region_is_rejected() {
        assert!(KeyNormalizer::new("XX").is_err());
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(
            region in prop::sample::select(vec!["US", "GB", "DE", "IT", "AU", "JP"]),
            raw in "[+]?[0-9 ()-]{3,20}",
        ) {
            let normalizer = KeyNormalizer::new(region).unwrap();
            if let Ok(once) = normalizer.normalize(&raw) {
                let twice = normalizer.normalize(once.as_str()).unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
