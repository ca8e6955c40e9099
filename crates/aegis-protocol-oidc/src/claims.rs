//! JWT claim types for minted ID tokens.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::ID_TOKEN_CLAIM_USERNAME;

/// ID token claims (RFC 7519 plus `OpenID` Connect Core 1.0).
///
/// Identity claims that are not part of the registered set, such as the
/// username, live in the flattened `extra` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer URL of the authorization server.
    pub iss: String,

    /// Subject, the unique identifier for the user.
    pub sub: String,

    /// Audience, the intended recipient of the token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued-at time (Unix timestamp).
    pub iat: i64,

    /// Authentication time (Unix timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,

    /// JWT ID, unique per token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,

    /// Additional identity claims.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl IdTokenClaims {
    /// Creates new claims with a fresh issued-at time and JWT ID.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            iss: issuer.into(),
            sub: subject.into(),
            aud: None,
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            auth_time: None,
            jti: Some(Uuid::now_v7().to_string()),
            extra: HashMap::new(),
        }
    }

    /// Sets the audience.
    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.aud = Some(audience.into());
        self
    }

    /// Sets the authentication time.
    #[must_use]
    pub const fn with_auth_time(mut self, auth_time: i64) -> Self {
        self.auth_time = Some(auth_time);
        self
    }

    /// Adds an extra identity claim.
    #[must_use]
    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Sets the username claim.
    #[must_use]
    pub fn with_username(self, username: impl Into<String>) -> Self {
        self.with_claim(
            ID_TOKEN_CLAIM_USERNAME,
            serde_json::Value::String(username.into()),
        )
    }

    /// Returns the username claim when it is a non-empty string.
    ///
    /// The username is only stored in the session's claims when the
    /// username scope was requested and granted.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self.extra.get(ID_TOKEN_CLAIM_USERNAME) {
            Some(serde_json::Value::String(username)) if !username.is_empty() => Some(username),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> IdTokenClaims {
        IdTokenClaims::new(
            "https://issuer.example.com",
            "some-subject",
            Utc::now() + chrono::Duration::minutes(5),
        )
    }

    #[test]
    fn username_requires_a_non_empty_string() {
        assert_eq!(claims().with_username("alice").username(), Some("alice"));
        assert_eq!(claims().username(), None);
        assert_eq!(claims().with_username("").username(), None);
        assert_eq!(
            claims()
                .with_claim(ID_TOKEN_CLAIM_USERNAME, serde_json::json!(42))
                .username(),
            None
        );
    }

    #[test]
    fn extra_claims_are_flattened() {
        let json = serde_json::to_value(claims().with_username("alice")).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["iss"], "https://issuer.example.com");
        assert!(json.get("extra").is_none());
    }
}
