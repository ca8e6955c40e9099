//! LDAP provider error types.
//!
//! ## Security Note
//!
//! Error messages carry identifying context (host, bind DN, attribute name,
//! username) but must never include passwords.

use thiserror::Error;

/// LDAP result code for a bind rejected due to invalid credentials.
pub const RESULT_CODE_INVALID_CREDENTIALS: u32 = 49;

/// Errors surfaced by the upstream LDAP provider.
#[derive(Debug, Error)]
pub enum LdapError {
    /// Invalid provider configuration, rejected before any network I/O.
    #[error("invalid provider configuration: {0}")]
    Config(String),

    /// TCP or TLS level failure, including CA bundle parse failures.
    #[error("network error: {0}")]
    Network(String),

    /// A bind was rejected by the server with an LDAP result code.
    #[error("bind rejected with LDAP result code {code}: {message}")]
    BindRejected {
        /// The LDAP result code returned by the server.
        code: u32,
        /// The diagnostic message returned by the server.
        message: String,
    },

    /// A search failed at the protocol level.
    #[error("search failed: {0}")]
    Search(String),

    /// Some other protocol-level failure from the LDAP library.
    #[error("LDAP protocol error: {0}")]
    Protocol(String),

    /// Dialing the configured host failed.
    #[error(r#"error dialing host "{host}": {source}"#)]
    Dial {
        /// The configured host.
        host: String,
        /// The underlying failure.
        #[source]
        source: Box<LdapError>,
    },

    /// The service-account bind failed while testing the connection.
    #[error(r#"error binding as "{username}": {source}"#)]
    Bind {
        /// The configured service-account bind username.
        username: String,
        /// The underlying failure.
        #[source]
        source: Box<LdapError>,
    },

    /// The service-account bind failed before the user search.
    #[error(r#"error binding as "{username}" before user search: {source}"#)]
    ServiceBind {
        /// The configured service-account bind username.
        username: String,
        /// The underlying failure.
        #[source]
        source: Box<LdapError>,
    },

    /// The user search failed.
    #[error(r#"error searching for user "{username}": {source}"#)]
    UserSearch {
        /// The end-user username that was searched for.
        username: String,
        /// The underlying failure.
        #[source]
        source: Box<LdapError>,
    },

    /// The user search matched more than one entry.
    #[error(r#"searching for user "{username}" resulted in {count} search results, but expected 1 result"#)]
    AmbiguousResult {
        /// The end-user username that was searched for.
        username: String,
        /// How many entries the search returned.
        count: usize,
    },

    /// The user search returned an entry without a DN.
    #[error(r#"searching for user "{username}" resulted in search result without DN"#)]
    MissingDn {
        /// The end-user username that was searched for.
        username: String,
    },

    /// A mapped attribute did not have exactly one value.
    #[error(r#"found {count} values for attribute "{attribute}" while searching for user "{username}", but expected 1 result"#)]
    AttributeValueCount {
        /// The attribute that was read from the user entry.
        attribute: String,
        /// The end-user username that was searched for.
        username: String,
        /// How many values the attribute had.
        count: usize,
    },

    /// A mapped attribute had an empty value.
    #[error(r#"found empty value for attribute "{attribute}" while searching for user "{username}", but expected value to be non-empty"#)]
    EmptyAttributeValue {
        /// The attribute that was read from the user entry.
        attribute: String,
        /// The end-user username that was searched for.
        username: String,
    },

    /// The end-user bind failed for a reason other than invalid credentials.
    #[error(r#"error binding for user "{username}" using provided password against DN "{dn}": {source}"#)]
    UserBind {
        /// The end-user username that was searched for.
        username: String,
        /// The DN discovered for the user.
        dn: String,
        /// The underlying failure.
        #[source]
        source: Box<LdapError>,
    },
}

impl LdapError {
    /// Whether this error is a bind rejected for invalid credentials
    /// (LDAP result code 49).
    #[must_use]
    pub const fn is_invalid_credentials(&self) -> bool {
        matches!(
            self,
            Self::BindRejected {
                code: RESULT_CODE_INVALID_CREDENTIALS,
                ..
            }
        )
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }
}

/// Result type for LDAP provider operations.
pub type LdapResult<T> = Result<T, LdapError>;
