//! # aegis-protocol-oidc
//!
//! RFC 8693 token exchange for the Aegis federation gateway.
//!
//! The token-exchange handler takes a previously issued access token, bound
//! to an authenticated session, and mints a short-lived ID token (JWT) whose
//! audience is a downstream workload cluster's token validator. The handler
//! plugs into the surrounding OAuth2 framework through narrow capability
//! traits: an access-token strategy (signatures and validation), an
//! access-token storage (session lookup by signature), and an ID-token
//! strategy (JWT minting).

#![forbid(unsafe_code)]
#![deny(warnings)]
#![deny(missing_docs)]

pub mod claims;
pub mod error;
pub mod exchange;
pub mod oauth;
pub mod session;
pub mod token;
pub mod types;

pub use claims::IdTokenClaims;
pub use error::{ErrorResponse, OauthError, OauthResult};
pub use exchange::TokenExchangeHandler;
pub use oauth::{
    AccessRequest, AccessResponse, AccessTokenStorage, AccessTokenStrategy, Client,
    IdTokenStrategy, InMemoryAccessTokenStorage, Session, StoredRequest,
};
pub use session::FederationSession;
pub use token::{HmacAccessTokenStrategy, JwtIdTokenMinter};
pub use types::{Arguments, RequestForm};
