//! The typed session stored by this system.
//!
//! The framework stores sessions as opaque values. Handlers that need the
//! typed shape downcast through [`FederationSession::from_session`]; a
//! failed downcast is an internal invariant violation, not a user error.

use std::any::Any;

use chrono::{DateTime, Utc};

use crate::claims::IdTokenClaims;
use crate::error::{OauthError, OauthResult};
use crate::oauth::Session;

/// The session shape this system stores for every authorized request.
#[derive(Debug, Clone)]
pub struct FederationSession {
    /// The ID-token claims captured at authorization time.
    pub id_token_claims: IdTokenClaims,

    /// When the access token bound to this session expires.
    pub access_token_expires_at: Option<DateTime<Utc>>,
}

impl FederationSession {
    /// Creates a session from ID-token claims.
    #[must_use]
    pub fn new(id_token_claims: IdTokenClaims) -> Self {
        Self {
            id_token_claims,
            access_token_expires_at: None,
        }
    }

    /// Sets the access-token expiry.
    #[must_use]
    pub const fn with_access_token_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.access_token_expires_at = Some(expires_at);
        self
    }

    /// Returns the username stored in the session's ID-token claims, when
    /// it is a non-empty string.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.id_token_claims.username()
    }

    /// Views an opaque session as a `FederationSession`.
    ///
    /// # Errors
    ///
    /// Returns a server error when the session has a different shape, which
    /// indicates invalid session storage.
    pub fn from_session(session: &dyn Session) -> OauthResult<&Self> {
        session
            .as_any()
            .downcast_ref::<Self>()
            .ok_or_else(|| OauthError::ServerError("Invalid session storage.".to_string()))
    }
}

impl Session for FederationSession {
    fn as_any(&self) -> &dyn Any {
        self
    }
}
