//! Token storage and management

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::models::CurrentUser;

/// Stored access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    /// Unix seconds, from the JWT `exp` claim when present
    pub expires_at: Option<u64>,
}

fn now_secs() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

impl StoredToken {
    /// Wrap a bearer token, reading its expiry from the JWT payload. Opaque
    /// tokens are kept without an expiry.
    pub fn from_jwt(token: String) -> Self {
        let expires_at = jwt_expiry(&token);
        if expires_at.is_none() {
            tracing::debug!("Token carries no readable exp claim");
        }
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // Treat the last 30 seconds as expired
            Some(exp) => now_secs() + 30 >= exp,
            None => false,
        }
    }

    pub fn expires_at_utc(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        let exp = i64::try_from(self.expires_at?).ok()?;
        chrono::DateTime::from_timestamp(exp, 0)
    }
}

#[derive(Deserialize)]
struct Claims {
    exp: Option<u64>,
}

fn jwt_expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<Claims>(&bytes).ok()?.exp
}

/// Credential store trait for different storage backends
pub trait TokenStore {
    fn get_token(&self) -> Option<StoredToken>;
    fn set_token(&mut self, token: StoredToken);
    fn get_user(&self) -> Option<CurrentUser>;
    fn set_user(&mut self, user: CurrentUser);
    fn clear_tokens(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(payload: &serde_json::Value) -> String {
        let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.sig",
            enc.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
            enc.encode(payload.to_string())
        )
    }

    #[test]
    fn test_from_jwt_reads_exp() {
        let token = StoredToken::from_jwt(jwt(&serde_json::json!({"user_id": 3, "exp": 4102444800u64})));
        assert_eq!(token.expires_at, Some(4_102_444_800));
        assert!(!token.is_expired());
        assert_eq!(
            token.expires_at_utc().unwrap().to_rfc3339(),
            "2100-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_expired_jwt() {
        let token = StoredToken::from_jwt(jwt(&serde_json::json!({"exp": 1_600_000_000u64})));
        assert!(token.is_expired());
    }

    #[test]
    fn test_opaque_token_never_expires_locally() {
        let token = StoredToken::from_jwt("3f2a9c0d1e".into());
        assert_eq!(token.expires_at, None);
        assert!(!token.is_expired());

        let token = StoredToken::from_jwt("a.!!!.c".into());
        assert_eq!(token.expires_at, None);
    }

    #[test]
    fn test_expiry_margin() {
        let token = StoredToken {
            token: "t".into(),
            expires_at: Some(now_secs() + 3600),
        };
        assert!(!token.is_expired());
        let token = StoredToken {
            token: "t".into(),
            expires_at: Some(now_secs() + 10),
        };
        assert!(token.is_expired());
    }
}
