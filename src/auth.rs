// src/auth.rs
use crate::error::ApiError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const PBKDF2_ROUNDS: u32 = 10_000;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: usize,
}

/// Signs and verifies session tokens.
pub struct TokenKeys {
    secret: String,
    ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: impl Into<String>, ttl: Duration) -> Self {
        TokenKeys {
            secret: secret.into(),
            ttl,
        }
    }

    pub fn create_token(&self, user_id: &str) -> Result<String, ApiError> {
        let claims = Claims {
            sub: user_id.to_string(),
            exp: (Utc::now() + self.ttl).timestamp().max(0) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::Internal(format!("failed to sign token: {}", e)))
    }

    /// Returns the user id the token was issued to.
    pub fn verify_token(&self, token: &str) -> Result<String, ApiError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims.sub)
        .map_err(|_| ApiError::Unauthorized("Token is not valid".to_string()))
    }

    /// Resolves an `Authorization` header value of the form `Bearer <token>`.
    pub fn authorize(&self, header: Option<&str>) -> Result<String, ApiError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("No token, authorization denied".to_string()))?;
        self.verify_token(token)
    }
}

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

/// PBKDF2-HMAC-SHA256, single 32-byte block.
fn pbkdf2_sha256(password: &[u8], salt: &[u8], rounds: u32) -> Result<[u8; 32], ApiError> {
    let keyed = HmacSha256::new_from_slice(password)
        .map_err(|e| ApiError::Internal(format!("failed to key password hash: {}", e)))?;

    let mut mac = keyed.clone();
    mac.update(salt);
    mac.update(&1u32.to_be_bytes());
    let mut block = [0u8; 32];
    block.copy_from_slice(&mac.finalize().into_bytes());

    let mut derived = block;
    for _ in 1..rounds {
        let mut mac = keyed.clone();
        mac.update(&block);
        block.copy_from_slice(&mac.finalize().into_bytes());
        for (d, b) in derived.iter_mut().zip(block.iter()) {
            *d ^= b;
        }
    }
    Ok(derived)
}

pub fn hash_password(password: &str, salt: &str) -> Result<String, ApiError> {
    let derived = pbkdf2_sha256(password.as_bytes(), salt.as_bytes(), PBKDF2_ROUNDS)?;
    Ok(STANDARD.encode(derived))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    hash_password(password, salt)
        .map(|hash| constant_time_eq(hash.as_bytes(), expected_hash.as_bytes()))
        .unwrap_or(false)
}

/// Lowercases and checks the shape of an email address.
pub fn normalize_email(email: &str) -> Result<String, ApiError> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(ApiError::Validation("Please provide a valid email".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> TokenKeys {
        TokenKeys::new("test-secret", Duration::hours(1))
    }

    #[test]
    fn test_token_round_trip() {
        let keys = keys();
        let token = keys.create_token("user-42").unwrap();
        assert_eq!(keys.verify_token(&token).unwrap(), "user-42");
        let header = format!("Bearer {}", token);
        assert_eq!(keys.authorize(Some(&header)).unwrap(), "user-42");
    }

    #[test]
    fn test_token_signed_with_other_secret_is_rejected() {
        let token = TokenKeys::new("other", Duration::hours(1))
            .create_token("user-42")
            .unwrap();
        assert!(matches!(keys().verify_token(&token), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let stale = TokenKeys::new("test-secret", Duration::hours(-2));
        let token = stale.create_token("user-42").unwrap();
        assert!(keys().verify_token(&token).is_err());
    }

    #[test]
    fn test_missing_or_malformed_header() {
        assert!(keys().authorize(None).is_err());
        assert!(keys().authorize(Some("Basic abc")).is_err());
        assert!(keys().authorize(Some("Bearer ")).is_err());
    }

    #[test]
    fn test_password_hashing() {
        let salt = new_salt();
        let hash = hash_password("hunter22", &salt).unwrap();
        assert!(verify_password("hunter22", &salt, &hash));
        assert!(!verify_password("hunter23", &salt, &hash));
        assert!(!verify_password("hunter22", &salt, &hash[..hash.len() - 1]));
        assert_ne!(hash, hash_password("hunter22", &new_salt()).unwrap());
    }

    #[test]
    fn test_pbkdf2_known_answer() {
        // RFC 7914 section 11, first 32 bytes
        let derived = pbkdf2_sha256(b"passwd", b"salt", 1).unwrap();
        assert_eq!(
            derived[..8],
            [0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f]
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email(" Ana@Example.COM ").unwrap(), "ana@example.com");
        assert!(normalize_email("not-an-email").is_err());
        assert!(normalize_email("@example.com").is_err());
    }
}
