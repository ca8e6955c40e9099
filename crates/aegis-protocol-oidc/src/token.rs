//! Default token strategies.
//!
//! [`HmacAccessTokenStrategy`] implements the opaque access-token format
//! used by the framework: `<random>.<signature>`, where the signature is an
//! HMAC-SHA256 over the random part and doubles as the token's storage key.
//! [`JwtIdTokenMinter`] signs ID tokens whose audience is taken from the
//! access request's client id.

use aws_lc_rs::{constant_time, hmac, rand};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::{OauthError, OauthResult};
use crate::oauth::{AccessRequest, AccessTokenStrategy, IdTokenStrategy, StoredRequest};
use crate::session::FederationSession;

/// Default ID-token lifespan, in seconds.
pub const DEFAULT_ID_TOKEN_LIFESPAN_SECONDS: i64 = 300;

fn invalid_subject_token() -> OauthError {
    OauthError::RequestUnauthorized("Invalid 'subject_token' parameter value.".to_string())
}

// ============================================================================
// HMAC Access-Token Strategy
// ============================================================================

/// Issues and validates opaque access tokens of the form
/// `<random>.<base64url(HMAC-SHA256(random))>`.
pub struct HmacAccessTokenStrategy {
    secret: Vec<u8>,
}

impl HmacAccessTokenStrategy {
    /// Creates a strategy keyed with `secret`.
    #[must_use]
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Generates a fresh access token.
    ///
    /// # Errors
    ///
    /// Returns a server error when randomness is unavailable.
    pub fn generate(&self) -> OauthResult<String> {
        let mut random = [0u8; 32];
        rand::fill(&mut random).map_err(|_| {
            OauthError::ServerError("failed to generate token randomness".to_string())
        })?;
        let payload = URL_SAFE_NO_PAD.encode(random);
        let signature = self.compute_signature(&payload);
        Ok(format!("{payload}.{signature}"))
    }

    fn compute_signature(&self, payload: &str) -> String {
        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.secret);
        URL_SAFE_NO_PAD.encode(hmac::sign(&key, payload.as_bytes()).as_ref())
    }
}

impl std::fmt::Debug for HmacAccessTokenStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacAccessTokenStrategy")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl AccessTokenStrategy for HmacAccessTokenStrategy {
    fn access_token_signature(&self, token: &str) -> String {
        token.rsplit('.').next().unwrap_or_default().to_string()
    }

    async fn validate_access_token(
        &self,
        original: &StoredRequest,
        token: &str,
    ) -> OauthResult<()> {
        let Some((payload, signature)) = token.rsplit_once('.') else {
            return Err(invalid_subject_token());
        };
        let presented = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| invalid_subject_token())?;

        let key = hmac::Key::new(hmac::HMAC_SHA256, &self.secret);
        let expected = hmac::sign(&key, payload.as_bytes());
        constant_time::verify_slices_are_equal(expected.as_ref(), &presented)
            .map_err(|_| invalid_subject_token())?;

        let session = FederationSession::from_session(original.session.as_ref())?;
        if let Some(expires_at) = session.access_token_expires_at {
            if expires_at <= Utc::now() {
                return Err(OauthError::RequestUnauthorized(
                    "Token has expired.".to_string(),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// JWT ID-Token Minter
// ============================================================================

/// Mints signed ID tokens from a request's session claims.
///
/// The audience of the minted token is the request's client id; issuer,
/// issued-at, expiration, and JWT ID are set freshly at mint time. All
/// other identity claims carry over from the session.
pub struct JwtIdTokenMinter {
    issuer: String,
    lifespan: Duration,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
}

impl JwtIdTokenMinter {
    /// Creates a minter.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        lifespan_seconds: i64,
        algorithm: Algorithm,
        encoding_key: EncodingKey,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            lifespan: Duration::seconds(lifespan_seconds),
            algorithm,
            encoding_key,
        }
    }

    /// Creates an HS256 minter with the default lifespan. Intended for
    /// tests and development; deployments use an asymmetric algorithm.
    #[must_use]
    pub fn hs256(issuer: impl Into<String>, secret: &[u8]) -> Self {
        Self::new(
            issuer,
            DEFAULT_ID_TOKEN_LIFESPAN_SECONDS,
            Algorithm::HS256,
            EncodingKey::from_secret(secret),
        )
    }
}

#[async_trait]
impl IdTokenStrategy for JwtIdTokenMinter {
    async fn generate_id_token(&self, request: &AccessRequest) -> OauthResult<String> {
        let session = FederationSession::from_session(request.session.as_ref())?;

        let now = Utc::now();
        let mut claims = session.id_token_claims.clone();
        claims.iss = self.issuer.clone();
        claims.aud = Some(request.client.id.clone());
        claims.iat = now.timestamp();
        claims.exp = (now + self.lifespan).timestamp();
        claims.jti = Some(Uuid::now_v7().to_string());

        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| OauthError::ServerError(format!("failed to sign ID token: {e}")))
    }
}
