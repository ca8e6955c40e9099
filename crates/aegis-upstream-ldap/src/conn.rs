//! LDAP connection capabilities and the default TLS dialer.
//!
//! The provider talks to the upstream directory through two narrow
//! capabilities: [`Dialer`] opens a connection to a `host:port`, and the
//! resulting [`Conn`] can bind, search, and unbind. Tests inject fakes for
//! either capability; production uses [`TlsDialer`] over `ldap3`.
//!
//! ## Security Requirements
//!
//! Connections are LDAPS from the first byte (TLS 1.2 minimum). STARTTLS
//! and plain LDAP are not supported.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, SearchEntry, SearchOptions};

use crate::error::{LdapError, LdapResult};

/// The default LDAPS port, used when the configured host omits a port.
pub const DEFAULT_LDAPS_PORT: u16 = 636;

// ============================================================================
// Search Request and Results
// ============================================================================

/// LDAP search scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchScope {
    /// Search only the base DN.
    Base,
    /// Search one level below the base DN.
    OneLevel,
    /// Search the entire subtree.
    #[default]
    WholeSubtree,
}

impl SearchScope {
    /// Converts to the `ldap3` scope.
    #[must_use]
    pub fn to_ldap3(self) -> ldap3::Scope {
        match self {
            Self::Base => ldap3::Scope::Base,
            Self::OneLevel => ldap3::Scope::OneLevel,
            Self::WholeSubtree => ldap3::Scope::Subtree,
        }
    }
}

/// Alias dereferencing behavior for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerefAliases {
    /// Never dereference aliases.
    Never,
    /// Dereference while searching below the base DN.
    Searching,
    /// Dereference while locating the base DN.
    Finding,
    /// Always dereference aliases.
    #[default]
    Always,
}

impl DerefAliases {
    /// Converts to the `ldap3` dereferencing policy.
    #[must_use]
    pub fn to_ldap3(self) -> ldap3::DerefAliases {
        match self {
            Self::Never => ldap3::DerefAliases::Never,
            Self::Searching => ldap3::DerefAliases::Searching,
            Self::Finding => ldap3::DerefAliases::Finding,
            Self::Always => ldap3::DerefAliases::Always,
        }
    }
}

/// A single LDAP search operation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchRequest {
    /// Base DN of the search.
    pub base_dn: String,

    /// Search scope.
    pub scope: SearchScope,

    /// Alias dereferencing behavior.
    pub deref_aliases: DerefAliases,

    /// Server-side cap on the number of returned entries. Zero means no
    /// client-requested limit.
    pub size_limit: i32,

    /// Server-side time limit for the search, in seconds.
    pub time_limit: i32,

    /// When true, return attribute names without values.
    pub types_only: bool,

    /// Search filter.
    pub filter: String,

    /// Attributes to return on each entry.
    pub attributes: Vec<String>,
}

/// An entry returned by a user search, with its textual attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserEntry {
    /// Distinguished name of the entry.
    pub dn: String,

    /// Attribute values, keyed by attribute name.
    pub attributes: HashMap<String, Vec<String>>,
}

impl UserEntry {
    /// Builds an entry from an `ldap3` search entry.
    #[must_use]
    pub fn from_search_entry(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attributes: entry.attrs,
        }
    }

    /// Returns all values of an attribute, or an empty slice when absent.
    #[must_use]
    pub fn attribute_values(&self, name: &str) -> &[String] {
        self.attributes.get(name).map_or(&[], Vec::as_slice)
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// The subset of the LDAP protocol the provider needs from a connection.
#[async_trait]
pub trait Conn: Send {
    /// Performs a simple bind as `dn` with `password`.
    async fn simple_bind(&mut self, dn: &str, password: &str) -> LdapResult<()>;

    /// Executes a search and returns the matching entries.
    async fn search(&mut self, request: &SearchRequest) -> LdapResult<Vec<UserEntry>>;

    /// Releases the connection. Safe to call on any connection state.
    async fn unbind(&mut self);
}

/// Opens connections to an upstream LDAP server.
///
/// Implementations must be safe for concurrent use. Dialing is
/// cancellation-aware: dropping or timing out the returned future aborts
/// connection establishment.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dials `host_and_port` and returns a ready connection.
    async fn dial(&self, host_and_port: &str) -> LdapResult<Box<dyn Conn>>;
}

// ============================================================================
// Host and Port Normalization
// ============================================================================

/// Appends `default_port` when `host_and_port` does not already include a
/// port. Accepts `host`, `host:port`, `[v6]`, and `[v6]:port` forms;
/// existing ports and IPv6 brackets are preserved verbatim.
///
/// # Errors
///
/// Returns a network error for unparsable addresses, e.g. bare IPv6 without
/// brackets or an unmatched `[`.
pub fn host_and_port_with_default_port(
    host_and_port: &str,
    default_port: u16,
) -> LdapResult<String> {
    if let Some(rest) = host_and_port.strip_prefix('[') {
        let Some(end) = rest.find(']') else {
            return Err(LdapError::network(format!(
                "address {host_and_port}: missing ']' in address"
            )));
        };
        let after = &rest[end + 1..];
        return match after {
            "" => Ok(format!("{host_and_port}:{default_port}")),
            _ if after.starts_with(':') && after.len() > 1 => Ok(host_and_port.to_string()),
            _ => Err(LdapError::network(format!(
                "address {host_and_port}: invalid port after ']'"
            ))),
        };
    }

    match host_and_port.matches(':').count() {
        0 => Ok(format!("{host_and_port}:{default_port}")),
        1 => {
            if let Some((host, port)) = host_and_port.split_once(':') {
                if port.is_empty() {
                    return Ok(host.to_string());
                }
            }
            Ok(host_and_port.to_string())
        }
        _ => Err(LdapError::network(format!(
            "address {host_and_port}: too many colons in address"
        ))),
    }
}

// ============================================================================
// Default TLS Dialer
// ============================================================================

/// The default production dialer: TLS 1.2+ from connection start, trusting
/// either the configured CA bundle exclusively or the system roots.
#[derive(Debug, Clone, Default)]
pub struct TlsDialer {
    ca_bundle: Option<Vec<u8>>,
}

impl TlsDialer {
    /// Creates a dialer. When `ca_bundle` is `Some`, its PEM certificates
    /// become the sole roots of trust; otherwise the system roots are used.
    #[must_use]
    pub fn new(ca_bundle: Option<Vec<u8>>) -> Self {
        Self { ca_bundle }
    }

    fn tls_config(&self) -> LdapResult<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();

        match &self.ca_bundle {
            Some(pem) => {
                let certs = rustls_pemfile::certs(&mut pem.as_slice())
                    .map_err(|_| LdapError::network("could not parse CA bundle"))?;
                let (added, _ignored) = roots.add_parsable_certificates(&certs);
                if added == 0 {
                    return Err(LdapError::network("could not parse CA bundle"));
                }
            }
            None => {
                let certs = rustls_native_certs::load_native_certs().map_err(|e| {
                    LdapError::network(format!("could not load system roots: {e}"))
                })?;
                let ders: Vec<Vec<u8>> = certs.into_iter().map(|c| c.0).collect();
                roots.add_parsable_certificates(&ders);
            }
        }

        Ok(rustls::ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth())
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self, host_and_port: &str) -> LdapResult<Box<dyn Conn>> {
        let tls_config = self.tls_config()?;
        let settings = LdapConnSettings::new().set_config(Arc::new(tls_config));
        let url = format!("ldaps://{host_and_port}");

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &url)
            .await
            .map_err(|e| LdapError::network(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                tracing::warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(Box::new(LdapConn { ldap }))
    }
}

/// A production connection over `ldap3`.
struct LdapConn {
    ldap: ldap3::Ldap,
}

#[async_trait]
impl Conn for LdapConn {
    async fn simple_bind(&mut self, dn: &str, password: &str) -> LdapResult<()> {
        let result = self
            .ldap
            .simple_bind(dn, password)
            .await
            .map_err(|e| LdapError::Protocol(e.to_string()))?;

        match result.success() {
            Ok(_) => Ok(()),
            Err(ldap3::LdapError::LdapResult { result }) => Err(LdapError::BindRejected {
                code: result.rc,
                message: result.text,
            }),
            Err(e) => Err(LdapError::Protocol(e.to_string())),
        }
    }

    async fn search(&mut self, request: &SearchRequest) -> LdapResult<Vec<UserEntry>> {
        let options = SearchOptions::new()
            .deref(request.deref_aliases.to_ldap3())
            .typesonly(request.types_only)
            .timelimit(request.time_limit)
            .sizelimit(request.size_limit);
        let attributes: Vec<&str> = request.attributes.iter().map(String::as_str).collect();

        let (entries, _result) = self
            .ldap
            .clone()
            .with_search_options(options)
            .search(
                &request.base_dn,
                request.scope.to_ldap3(),
                &request.filter,
                attributes,
            )
            .await
            .map_err(|e| LdapError::Search(e.to_string()))?
            .success()
            .map_err(|e| LdapError::Search(e.to_string()))?;

        Ok(entries
            .into_iter()
            .map(SearchEntry::construct)
            .map(UserEntry::from_search_entry)
            .collect())
    }

    async fn unbind(&mut self) {
        let _ = self.ldap.unbind().await;
    }
}
