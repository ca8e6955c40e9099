//! The upstream LDAP provider.
//!
//! Authentication is search-then-bind: bind with the configured service
//! account, search for the user entry, read the mapped attributes, then bind
//! as the discovered DN to verify the end user's password.
//!
//! ## Security
//!
//! - The end-user username is escaped before it is interpolated into the
//!   search filter.
//! - No LDAP command is issued after the end-user bind; any command after
//!   that bind would run under the end user's authority.
//! - Invalid credentials and unknown usernames are indistinguishable to the
//!   caller: both return `Ok(None)`.

use ldap3::ldap_escape;

use crate::config::{ProviderConfig, DN_ATTRIBUTE, FILTER_USERNAME_PLACEHOLDER};
use crate::conn::{
    host_and_port_with_default_port, Conn, DerefAliases, Dialer, SearchRequest, SearchScope,
    TlsDialer, DEFAULT_LDAPS_PORT,
};
use crate::error::{LdapError, LdapResult};

/// The user search caps the result set at two entries: enough to detect an
/// ambiguous match while bounding server work.
const USER_SEARCH_SIZE_LIMIT: i32 = 2;

/// Server-side time limit for the user search, in seconds. Applies in
/// addition to any deadline the caller puts on the whole operation.
const USER_SEARCH_TIME_LIMIT_SECONDS: i32 = 90;

/// A successfully authenticated (or dry-run resolved) end user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The mapped username.
    pub name: String,

    /// The mapped unique ID, unique within this provider.
    pub uid: String,

    /// Group memberships. Group search is not implemented yet, so this is
    /// always empty.
    pub groups: Vec<String>,
}

/// How the end-user bind step behaves. The dry-run path resolves the user
/// without verifying a password.
enum EndUserBind<'a> {
    /// Bind as the discovered DN with the end user's password.
    Password(&'a str),

    /// Skip the bind, acting as if it succeeded.
    AlwaysSucceed,
}

impl EndUserBind<'_> {
    async fn apply(&self, conn: &mut dyn Conn, user_dn: &str) -> LdapResult<()> {
        match self {
            Self::Password(password) => conn.simple_bind(user_dn, password).await,
            Self::AlwaysSucceed => Ok(()),
        }
    }
}

/// An upstream LDAP identity provider.
///
/// The provider owns a copy of its configuration, so it behaves as an
/// effectively read-only value and is safe for concurrent use without
/// locking. Every operation dials a fresh connection and releases it before
/// returning.
#[derive(Debug, Clone)]
pub struct Provider {
    config: ProviderConfig,
}

impl Provider {
    /// Creates a provider from a configuration. The configuration is moved
    /// in and never mutated afterwards.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    /// Returns a copy of the configuration. Mutating the returned value has
    /// no effect on the provider.
    #[must_use]
    pub fn get_config(&self) -> ProviderConfig {
        self.config.clone()
    }

    /// The unique name of this upstream provider.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns `ldaps://<host>`, which uniquely identifies this provider.
    ///
    /// The URL is never used for dialing; it is combined with a user's UID
    /// to form a globally unique user identifier, since UIDs are only unique
    /// within one provider.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ldaps://{}", self.config.host)
    }

    /// Tests the connection and bind settings: dial, bind as the service
    /// account, release.
    ///
    /// # Errors
    ///
    /// Returns distinct wrapped errors for dial failures (naming the host)
    /// and bind failures (naming the bind username).
    pub async fn test_connection(&self) -> LdapResult<()> {
        self.config.validate()?;

        let mut conn = match self.dial().await {
            Ok(conn) => conn,
            Err(e) => {
                return Err(LdapError::Dial {
                    host: self.config.host.clone(),
                    source: Box::new(e),
                })
            }
        };

        let result = conn
            .simple_bind(&self.config.bind_username, &self.config.bind_password)
            .await;
        conn.unbind().await;

        result.map_err(|e| LdapError::Bind {
            username: self.config.bind_username.clone(),
            source: Box::new(e),
        })
    }

    /// Authenticates an end user and returns their mapped username, UID, and
    /// groups.
    ///
    /// Returns `Ok(None)` when the username does not exist or the password
    /// is wrong, so the caller cannot distinguish the two cases.
    ///
    /// # Errors
    ///
    /// Returns configuration, network, and protocol errors, and hard errors
    /// for ambiguous search results or misconfigured attribute mappings.
    pub async fn authenticate_user(
        &self,
        username: &str,
        password: &str,
    ) -> LdapResult<Option<AuthenticatedUser>> {
        self.authenticate_user_impl(username, EndUserBind::Password(password))
            .await
    }

    /// Runs the same logic as [`Provider::authenticate_user`] except the
    /// end-user bind, so the password is not checked. Returns the same
    /// values a real authentication with the correct password would return.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Provider::authenticate_user`].
    pub async fn dry_run_authenticate_user(
        &self,
        username: &str,
    ) -> LdapResult<Option<AuthenticatedUser>> {
        self.authenticate_user_impl(username, EndUserBind::AlwaysSucceed)
            .await
    }

    async fn authenticate_user_impl(
        &self,
        username: &str,
        bind: EndUserBind<'_>,
    ) -> LdapResult<Option<AuthenticatedUser>> {
        self.config.validate()?;

        if username.is_empty() {
            // Empty passwords are rejected by the server at bind time.
            return Ok(None);
        }

        let mut conn = match self.dial().await {
            Ok(conn) => conn,
            Err(e) => {
                return Err(LdapError::Dial {
                    host: self.config.host.clone(),
                    source: Box::new(e),
                })
            }
        };

        let result = self.search_and_bind_user(&mut *conn, username, &bind).await;
        conn.unbind().await;

        match result? {
            Some((name, uid)) => Ok(Some(AuthenticatedUser {
                name,
                uid,
                groups: Vec::new(),
            })),
            None => Ok(None),
        }
    }

    async fn dial(&self) -> LdapResult<Box<dyn Conn>> {
        let host_and_port =
            host_and_port_with_default_port(&self.config.host, DEFAULT_LDAPS_PORT)?;
        match &self.config.dialer {
            Some(dialer) => dialer.dial(&host_and_port).await,
            None => {
                TlsDialer::new(self.config.ca_bundle.clone())
                    .dial(&host_and_port)
                    .await
            }
        }
    }

    async fn search_and_bind_user(
        &self,
        conn: &mut dyn Conn,
        username: &str,
        bind: &EndUserBind<'_>,
    ) -> LdapResult<Option<(String, String)>> {
        conn.simple_bind(&self.config.bind_username, &self.config.bind_password)
            .await
            .map_err(|e| LdapError::ServiceBind {
                username: self.config.bind_username.clone(),
                source: Box::new(e),
            })?;

        let entries = conn
            .search(&self.user_search_request(username))
            .await
            .map_err(|e| LdapError::UserSearch {
                username: username.to_string(),
                source: Box::new(e),
            })?;

        if entries.is_empty() {
            tracing::debug!(
                upstream = %self.config.name,
                username,
                "user not found during search (if this username is valid, check the user search configuration)"
            );
            return Ok(None);
        }
        if entries.len() > 1 {
            return Err(LdapError::AmbiguousResult {
                username: username.to_string(),
                count: entries.len(),
            });
        }

        let entry = &entries[0];
        if entry.dn.is_empty() {
            return Err(LdapError::MissingDn {
                username: username.to_string(),
            });
        }

        let mapped_username =
            self.attribute_value(&self.config.user_search.username_attribute, entry, username)?;
        let mapped_uid =
            self.attribute_value(&self.config.user_search.uid_attribute, entry, username)?;

        // Caution: any LDAP command after this bind would run as the end
        // user instead of the service account.
        if let Err(err) = bind.apply(conn, &entry.dn).await {
            tracing::debug!(
                upstream = %self.config.name,
                username,
                dn = %entry.dn,
                error = %err,
                "error binding as user (if this is not the expected DN for this username, check the user search configuration)"
            );
            if err.is_invalid_credentials() {
                return Ok(None);
            }
            return Err(LdapError::UserBind {
                username: username.to_string(),
                dn: entry.dn.clone(),
                source: Box::new(err),
            });
        }

        Ok(Some((mapped_username, mapped_uid)))
    }

    fn user_search_request(&self, username: &str) -> SearchRequest {
        SearchRequest {
            base_dn: self.config.user_search.base.clone(),
            scope: SearchScope::WholeSubtree,
            deref_aliases: DerefAliases::Always,
            size_limit: USER_SEARCH_SIZE_LIMIT,
            time_limit: USER_SEARCH_TIME_LIMIT_SECONDS,
            types_only: false,
            filter: self.user_search_filter(username),
            attributes: self.requested_attributes(),
        }
    }

    /// The attributes to request on the user entry. The DN is implicit on
    /// every entry, so it is never requested as an attribute.
    fn requested_attributes(&self) -> Vec<String> {
        let search = &self.config.user_search;
        let mut attributes = Vec::with_capacity(2);
        if search.username_attribute != DN_ATTRIBUTE {
            attributes.push(search.username_attribute.clone());
        }
        if search.uid_attribute != DN_ATTRIBUTE {
            attributes.push(search.uid_attribute.clone());
        }
        attributes
    }

    /// Builds the user search filter. The username is end-user input and is
    /// escaped before substitution to prevent query injection.
    fn user_search_filter(&self, username: &str) -> String {
        let safe_username = ldap_escape(username);
        let search = &self.config.user_search;

        if search.filter.is_empty() {
            return format!("({}={})", search.username_attribute, safe_username);
        }

        let filter = search
            .filter
            .replace(FILTER_USERNAME_PLACEHOLDER, &safe_username);
        if filter.starts_with('(') && filter.ends_with(')') {
            filter
        } else {
            format!("({filter})")
        }
    }

    fn attribute_value(
        &self,
        attribute: &str,
        entry: &crate::conn::UserEntry,
        username: &str,
    ) -> LdapResult<String> {
        if attribute == DN_ATTRIBUTE {
            return Ok(entry.dn.clone());
        }

        let values = entry.attribute_values(attribute);
        if values.len() != 1 {
            return Err(LdapError::AttributeValueCount {
                attribute: attribute.to_string(),
                username: username.to_string(),
                count: values.len(),
            });
        }

        let value = &values[0];
        if value.is_empty() {
            return Err(LdapError::EmptyAttributeValue {
                attribute: attribute.to_string(),
                username: username.to_string(),
            });
        }

        Ok(value.clone())
    }
}
