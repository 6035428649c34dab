use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Access-token lifetime: 24 hours.
const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// JWT claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID (UUIDv7)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Why a credential was rejected. The only error surfaced to end users is a
/// failed connection/authentication; everything downstream of a valid token
/// is self-healing no-ops.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("credential missing")]
    Missing,
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
    #[error("token revoked")]
    Revoked,
}

/// Load or generate the JWT signing key (256-bit random secret).
/// Key is stored as raw bytes in data_dir/jwt_secret — cryptographically
/// random, never human-readable.
pub fn load_or_generate_jwt_secret(data_dir: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let key_path = Path::new(data_dir).join("jwt_secret");

    if key_path.exists() {
        let key = std::fs::read(&key_path)?;
        if key.len() == 32 {
            tracing::info!("JWT signing key loaded from {}", key_path.display());
            return Ok(key);
        }
        // Invalid key file — regenerate.
        tracing::warn!("JWT key file has wrong size ({}), regenerating", key.len());
    }

    let key: [u8; 32] = rand::rng().random();
    std::fs::write(&key_path, key)?;
    tracing::info!("JWT signing key generated at {}", key_path.display());
    Ok(key.to_vec())
}

/// Issue an access token for a user.
pub fn issue_token(secret: &[u8], user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };

    encode(
        &Header::default(), // HS256
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

/// Identity verifier: opaque credential in, user id out. Called once per
/// WebSocket connection at setup, before any registry mutation.
pub fn verify(secret: &[u8], token: &str) -> Result<String, AuthError> {
    decode_claims(secret, token).map(|claims| claims.sub)
}

/// Validate an access token and return its claims.
pub fn decode_claims(secret: &[u8], token: &str) -> Result<Claims, AuthError> {
    let validation = Validation::new(jsonwebtoken::Algorithm::HS256);
    match decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation) {
        Ok(data) => Ok(data.claims),
        Err(err) => match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::Expired),
            _ => Err(AuthError::Invalid),
        },
    }
}

/// SHA-256 hash of a token, hex-encoded — the revocation list stores hashes,
/// never the token itself.
pub fn token_hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_to_the_same_user() {
        let secret = vec![7u8; 32];
        let token = issue_token(&secret, "user-1").unwrap();
        assert_eq!(verify(&secret, &token).unwrap(), "user-1");
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let token = issue_token(&[1u8; 32], "user-1").unwrap();
        assert!(matches!(
            verify(&[2u8; 32], &token),
            Err(AuthError::Invalid)
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            verify(&[1u8; 32], "not.a.jwt"),
            Err(AuthError::Invalid)
        ));
    }
}
