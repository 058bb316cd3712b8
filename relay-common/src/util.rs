//! Utility functions shared by the relay crates.

use once_cell::sync::Lazy;
use regex::Regex;

/// Channel prefix the gateway puts in front of WhatsApp addresses.
pub const WHATSAPP_PREFIX: &str = "whatsapp:";

/// E.164 phone number: `+`, non-zero leading digit, 2-15 digits total.
static E164: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+[1-9][0-9]{1,14}$").unwrap());

/// Why a channel address was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    Empty,
    MissingPrefix,
    InvalidNumber,
}

impl AddressError {
    /// Human-readable reason, used in validation details.
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Empty => "must not be empty",
            Self::MissingPrefix => "must start with the 'whatsapp:' channel prefix",
            Self::InvalidNumber => "must be an E.164 phone number such as +14155550100",
        }
    }
}

/// Check a gateway address such as `whatsapp:+14155550100`.
///
/// With `require_prefix` unset a bare E.164 number is accepted too.
pub fn check_channel_address(address: &str, require_prefix: bool) -> Result<(), AddressError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(AddressError::Empty);
    }

    let number = match address.strip_prefix(WHATSAPP_PREFIX) {
        Some(rest) => rest,
        None if require_prefix => return Err(AddressError::MissingPrefix),
        None => address,
    };

    if E164.is_match(number) {
        Ok(())
    } else {
        Err(AddressError::InvalidNumber)
    }
}

/// Mask all but the last four digits of an address for logging.
pub fn mask_address(address: &str) -> String {
    let digits = address.chars().filter(char::is_ascii_digit).count();
    if digits <= 4 {
        return address.to_string();
    }

    let mut remaining = digits - 4;
    address
        .chars()
        .map(|c| {
            if c.is_ascii_digit() && remaining > 0 {
                remaining -= 1;
                '*'
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_prefixed_number() {
        assert_eq!(check_channel_address("whatsapp:+100", true), Ok(()));
        assert_eq!(check_channel_address("whatsapp:+14155550100", true), Ok(()));
    }

    #[test]
    fn rejects_missing_prefix_when_required() {
        assert_eq!(
            check_channel_address("+14155550100", true),
            Err(AddressError::MissingPrefix)
        );
        assert_eq!(check_channel_address("+14155550100", false), Ok(()));
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert_eq!(
            check_channel_address("whatsapp:14155550100", true),
            Err(AddressError::InvalidNumber)
        );
        assert_eq!(
            check_channel_address("whatsapp:+0123", true),
            Err(AddressError::InvalidNumber)
        );
        assert_eq!(
            check_channel_address("whatsapp:+1234567890123456", true),
            Err(AddressError::InvalidNumber)
        );
        assert_eq!(check_channel_address("   ", true), Err(AddressError::Empty));
    }

    #[test]
    fn masks_leading_digits() {
        assert_eq!(mask_address("whatsapp:+14155550100"), "whatsapp:+*******0100");
        assert_eq!(mask_address("whatsapp:+100"), "whatsapp:+100");
    }
}
