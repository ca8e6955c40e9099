//! Narrow models of the OAuth2 framework collaborators.
//!
//! The token-exchange handler depends on the surrounding framework only
//! through the capabilities defined here: an access-token strategy
//! (signatures and validation), an access-token storage (session lookup by
//! signature), an ID-token strategy (JWT minting), and the request/response
//! value types. Sessions stay opaque; the handler views them through
//! [`std::any::Any`] downcasting.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::OauthResult;
use crate::types::{Arguments, RequestForm};

// ============================================================================
// Sessions and Clients
// ============================================================================

/// An opaque session owned by the framework's storage.
///
/// Concrete session types implement `as_any` so that handlers can view the
/// session through its expected shape and treat a failed downcast as an
/// internal invariant violation.
pub trait Session: Any + Send + Sync {
    /// Returns the session as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// An OAuth 2.0 client as seen by the token endpoint.
#[derive(Debug, Clone, Default)]
pub struct Client {
    /// The OAuth `client_id`.
    pub id: String,

    /// The grant types this client is allowed to use.
    pub grant_types: Arguments,
}

// ============================================================================
// Requests and Responses
// ============================================================================

/// A token-endpoint access request.
#[derive(Clone)]
pub struct AccessRequest {
    /// The grant types requested by this request.
    pub grant_types: Arguments,

    /// The authenticated client making the request.
    pub client: Client,

    /// The form parameters of the request.
    pub form: RequestForm,

    /// The session attached to this request.
    pub session: Arc<dyn Session>,
}

impl AccessRequest {
    /// Creates an access request.
    #[must_use]
    pub fn new(
        grant_types: Arguments,
        client: Client,
        form: RequestForm,
        session: Arc<dyn Session>,
    ) -> Self {
        Self {
            grant_types,
            client,
            form,
            session,
        }
    }

    /// Creates a request seeded from an existing session, with the client id
    /// overwritten. Used to mint a token whose audience differs from the
    /// client that originally obtained the session.
    #[must_use]
    pub fn for_session(session: Arc<dyn Session>, client_id: impl Into<String>) -> Self {
        Self {
            grant_types: Arguments::default(),
            client: Client {
                id: client_id.into(),
                grant_types: Arguments::default(),
            },
            form: RequestForm::new(),
            session,
        }
    }
}

impl fmt::Debug for AccessRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessRequest")
            .field("grant_types", &self.grant_types)
            .field("client", &self.client)
            .field("form", &self.form)
            .finish_non_exhaustive()
    }
}

/// The reconstituted original authorize request bound to a stored access
/// token.
#[derive(Clone)]
pub struct StoredRequest {
    /// The `client_id` of the client that made the original request.
    pub client_id: String,

    /// The scopes granted to the original request.
    pub granted_scopes: Arguments,

    /// The session created by the original request.
    pub session: Arc<dyn Session>,
}

impl fmt::Debug for StoredRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredRequest")
            .field("client_id", &self.client_id)
            .field("granted_scopes", &self.granted_scopes)
            .finish_non_exhaustive()
    }
}

/// A token-endpoint response under construction.
///
/// Framework-populated fields that are not first-class here travel in the
/// flattened `extra` map and pass through serialization unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccessResponse {
    /// The issued token.
    pub access_token: String,

    /// The type of the issued token.
    pub token_type: String,

    /// Additional response fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl AccessResponse {
    /// Creates an empty response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the issued token.
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
    }

    /// Sets the token type.
    pub fn set_token_type(&mut self, token_type: impl Into<String>) {
        self.token_type = token_type.into();
    }

    /// Sets an additional response field.
    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.extra.insert(key.into(), value.into());
    }

    /// Returns an additional response field.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }
}

// ============================================================================
// Framework Capabilities
// ============================================================================

/// Computes signatures for access tokens and validates them against their
/// stored session.
#[async_trait]
pub trait AccessTokenStrategy: Send + Sync {
    /// Returns the signature of an access token, used as its storage key.
    fn access_token_signature(&self, token: &str) -> String;

    /// Validates an access token against its stored session, enforcing
    /// integrity and expiry.
    async fn validate_access_token(
        &self,
        original: &StoredRequest,
        token: &str,
    ) -> OauthResult<()>;
}

/// Looks up the stored session data for an access token by signature.
#[async_trait]
pub trait AccessTokenStorage: Send + Sync {
    /// Returns the original request stored for `signature`, or `None` when
    /// no such token exists.
    async fn get_access_token_session(&self, signature: &str)
        -> OauthResult<Option<StoredRequest>>;
}

/// Mints ID tokens for an access request.
#[async_trait]
pub trait IdTokenStrategy: Send + Sync {
    /// Generates a signed ID token for the request's session and client.
    async fn generate_id_token(&self, request: &AccessRequest) -> OauthResult<String>;
}

// ============================================================================
// In-Memory Storage (for testing/development)
// ============================================================================

/// In-memory access-token storage.
///
/// Suitable for single-instance deployments and tests. Production uses the
/// framework's distributed storage.
#[derive(Default)]
pub struct InMemoryAccessTokenStorage {
    sessions: RwLock<HashMap<String, StoredRequest>>,
}

impl InMemoryAccessTokenStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an original request under an access-token signature.
    pub async fn store(&self, signature: &str, request: StoredRequest) {
        self.sessions
            .write()
            .await
            .insert(signature.to_string(), request);
    }

    /// Removes the original request stored under a signature.
    pub async fn remove(&self, signature: &str) {
        self.sessions.write().await.remove(signature);
    }
}

#[async_trait]
impl AccessTokenStorage for InMemoryAccessTokenStorage {
    async fn get_access_token_session(
        &self,
        signature: &str,
    ) -> OauthResult<Option<StoredRequest>> {
        Ok(self.sessions.read().await.get(signature).cloned())
    }
}
