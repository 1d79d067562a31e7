use std::env;

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::types::{ApiError, ValidationError};

/// Sessions expire five hours after issuance.
const TOKEN_TTL_HOURS: i64 = 5;

lazy_static! {
    static ref EMAIL_RE: Regex = {
        let pattern = r"\A[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\z";
        Regex::new(pattern).unwrap()
    };
}

pub fn validate_email_re(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_RE.is_match(email) {
        Err(ValidationError::from(
            "email",
            format!("Invalid email: {}", email),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_username_re(username: &str) -> Result<(), ValidationError> {
    if username.len() < 3 {
        Err(ValidationError::from(
            "username",
            format!("Username too short: {}", username),
        ))
    } else {
        Ok(())
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.len() < 5 {
        let e = ValidationError::from("password", "Password too short");
        Err(e)
    } else {
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: i32,
    pub email: String,
    pub exp: i64,
}

pub fn signing_key() -> Result<Hmac<Sha256>, ApiError> {
    let secret = env::var("SECRET").map_err(|_| ApiError::Internal)?;
    Hmac::new_from_slice(secret.as_bytes()).map_err(|_| ApiError::Internal)
}

pub fn issue_token(user_id: i32, email: &str, key: &Hmac<Sha256>) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        email: email.to_owned(),
        exp: (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
    };
    claims.sign_with_key(key).map_err(|_| ApiError::Internal)
}

pub fn verify_token(token: &str, key: &Hmac<Sha256>) -> Result<Claims, ApiError> {
    let claims: Claims = token.verify_with_key(key).map_err(|_| ApiError::Unauthorized)?;
    if claims.exp < Utc::now().timestamp() {
        return Err(ApiError::Unauthorized);
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(secret: &[u8]) -> Hmac<Sha256> {
        Hmac::new_from_slice(secret).unwrap()
    }

    #[test]
    fn accepts_plausible_emails() {
        assert!(validate_email_re("user@example.com").is_ok());
        assert!(validate_email_re("first.last@sub.domain.org").is_ok());
    }

    #[test]
    fn rejects_malformed_emails() {
        assert!(validate_email_re("not-an-email").is_err());
        assert!(validate_email_re("missing@tld@twice.com").is_err());
        assert!(validate_email_re("").is_err());
    }

    #[test]
    fn rejects_short_passwords_and_usernames() {
        assert!(validate_password("abcd").is_err());
        assert!(validate_password("abcde").is_ok());
        assert!(validate_username_re("ab").is_err());
        assert!(validate_username_re("abc").is_ok());
    }

    #[test]
    fn token_round_trips_id_and_email() {
        let key = key(b"test-secret");
        let token = issue_token(42, "user@example.com", &key).unwrap();
        let claims = verify_token(&token, &key).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.email, "user@example.com");
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = issue_token(42, "user@example.com", &key(b"test-secret")).unwrap();
        assert!(matches!(
            verify_token(&token, &key(b"other-secret")),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let key = key(b"test-secret");
        let claims = Claims {
            sub: 42,
            email: "user@example.com".to_owned(),
            exp: (Utc::now() - Duration::hours(1)).timestamp(),
        };
        let token = claims.sign_with_key(&key).unwrap();
        assert!(matches!(
            verify_token(&token, &key),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn garbage_token_is_rejected() {
        assert!(matches!(
            verify_token("definitely.not.a-jwt", &key(b"test-secret")),
            Err(ApiError::Unauthorized)
        ));
    }
}
