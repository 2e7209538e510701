use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::models::{Session, User};

/// Generate a cryptographically random 32-byte hex token.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Issue a fresh session for a user, valid for `hours` from `now`.
pub fn issue_session(user: User, hours: u64, now: DateTime<Utc>) -> Session {
    Session {
        user,
        access_token: generate_token(),
        refresh_token: Some(generate_token()),
        expires_at: now + Duration::hours(hours as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_unique() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn issued_session_expires_after_requested_hours() {
        let now = Utc::now();
        let session = issue_session(
            User {
                id: "u1".into(),
                email: Some("a@example.com".into()),
            },
            24,
            now,
        );
        assert_eq!(session.expires_at, now + Duration::hours(24));
        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + Duration::hours(24)));
        assert_ne!(Some(session.access_token.clone()), session.refresh_token);
    }
}
