//! API handlers for the safety core.
//!
//! `admin` carries the query surface for the admin UI, `gate` the two routes
//! the portfolio backend calls on its login path.

pub mod admin;
pub mod gate;
pub mod health;
pub mod root;

use regex::Regex;

/// Identifier sanity check applied before anything touches storage. Accepts
/// emails, usernames and IP literals.
#[must_use]
pub fn valid_identifier(identifier: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9._@:-]{1,256}$").is_ok_and(|re| re.is_match(identifier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_identifier_accepts_email() {
        assert!(valid_identifier("user@example.com"));
    }

    #[test]
    fn valid_identifier_accepts_ip_literals() {
        assert!(valid_identifier("192.168.1.10"));
        assert!(valid_identifier("2001:db8::1"));
    }

    #[test]
    fn valid_identifier_rejects_empty_and_oversized() {
        assert!(!valid_identifier(""));
        assert!(!valid_identifier(&"a".repeat(257)));
    }

    #[test]
    fn valid_identifier_rejects_control_and_whitespace() {
        assert!(!valid_identifier("user name"));
        assert!(!valid_identifier("user\nname"));
        assert!(!valid_identifier("user;drop"));
    }
}
