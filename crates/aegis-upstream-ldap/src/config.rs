//! Upstream LDAP provider configuration.
//!
//! The configuration is an immutable value: the provider copies it at
//! construction and hands out fresh copies on read, so no locking is needed
//! for concurrent use.

use std::fmt;
use std::sync::Arc;

use crate::conn::Dialer;
use crate::error::{LdapError, LdapResult};

/// The attribute name that refers to an entry's distinguished name rather
/// than a real attribute. A DN is implicit on every entry, so it is never
/// requested as a search attribute, and it cannot be used in a search filter.
pub const DN_ATTRIBUTE: &str = "dn";

/// The placeholder replaced by the escaped end-user username when a custom
/// user search filter is configured.
pub const FILTER_USERNAME_PLACEHOLDER: &str = "{}";

/// How to search for users in the upstream directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSearchConfig {
    /// Base DN for the user search.
    pub base: String,

    /// Search filter. When empty, `(<username_attribute>=<username>)` is
    /// used. Every `{}` in a non-empty filter is replaced by the escaped
    /// end-user username.
    pub filter: String,

    /// Attribute from which the mapped username is read. The special value
    /// `"dn"` maps the username to the entry's DN.
    pub username_attribute: String,

    /// Attribute from which the user's unique ID is read. The special value
    /// `"dn"` maps the UID to the entry's DN.
    pub uid_attribute: String,
}

/// Upstream LDAP provider configuration.
///
/// Nested values are owned (not shared) so that cloning yields an
/// independent copy.
#[derive(Clone, Default)]
pub struct ProviderConfig {
    /// Unique name of this upstream provider, used in logs and when
    /// composing globally unique user identifiers.
    pub name: String,

    /// `"hostname"` or `"hostname:port"` of the LDAP server. When the port
    /// is omitted, the default LDAPS port (636) is used.
    pub host: String,

    /// PEM-encoded CA certificate bundle to trust when connecting. When
    /// `None`, the system roots are used.
    pub ca_bundle: Option<Vec<u8>>,

    /// Service-account DN or username for the pre-search bind.
    pub bind_username: String,

    /// Service-account password for the pre-search bind.
    pub bind_password: String,

    /// How to search for users.
    pub user_search: UserSearchConfig,

    /// Optional dialer, injected by tests. When `None`, the default TLS
    /// dialer is used.
    pub dialer: Option<Arc<dyn Dialer>>,
}

impl ProviderConfig {
    /// Validates the configuration. Called before any network I/O.
    ///
    /// # Errors
    ///
    /// Returns an error when the username attribute is `"dn"` but no search
    /// filter is configured, since LDAP filters cannot match on DN.
    pub fn validate(&self) -> LdapResult<()> {
        if self.user_search.username_attribute == DN_ATTRIBUTE
            && self.user_search.filter.is_empty()
        {
            return Err(LdapError::config(
                r#"must specify a user search filter when the username attribute is "dn""#,
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("ca_bundle", &self.ca_bundle.as_ref().map(|b| b.len()))
            .field("bind_username", &self.bind_username)
            .field("bind_password", &"[REDACTED]")
            .field("user_search", &self.user_search)
            .field("dialer", &self.dialer.as_ref().map(|_| "injected"))
            .finish()
    }
}
