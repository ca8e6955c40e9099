//! Common token-exchange types and protocol constants.

use std::collections::HashMap;

/// The RFC 8693 token-exchange grant type.
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// The token type identifier for OAuth 2.0 access tokens.
pub const TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// The token type identifier for JWTs.
pub const TOKEN_TYPE_JWT: &str = "urn:ietf:params:oauth:token-type:jwt";

/// The `token_type` value for exchange responses. The minted JWT is not an
/// OAuth access token, so RFC 8693's "not applicable" marker is used.
pub const TOKEN_TYPE_NOT_APPLICABLE: &str = "N_A";

/// The `OpenID` Connect scope.
pub const SCOPE_OPENID: &str = "openid";

/// The scope which permits requesting audience-scoped tokens via exchange.
pub const SCOPE_REQUEST_AUDIENCE: &str = "pinniped:request-audience";

/// The scope which causes the username to be stored in the session's
/// ID-token claims.
pub const SCOPE_USERNAME: &str = "username";

/// The ID-token claim holding the authenticated username.
pub const ID_TOKEN_CLAIM_USERNAME: &str = "username";

/// The statically defined CLI client identifier. Reserved: it can never be
/// a requested audience.
pub const CLI_CLIENT_ID: &str = "pinniped-cli";

/// Audiences containing this marker anywhere are reserved for internal
/// client names and future use, and can never be requested audiences.
pub const RESERVED_AUDIENCE_MARKER: &str = ".pinniped.dev";

/// An ordered list of string-valued OAuth arguments, such as grant types or
/// granted scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Arguments(Vec<String>);

impl Arguments {
    /// Creates an argument list from the given values.
    #[must_use]
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    /// Whether the list contains `value`.
    #[must_use]
    pub fn has(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    /// Whether the list contains exactly one element equal to `value`.
    #[must_use]
    pub fn exact_one(&self, value: &str) -> bool {
        self.0.len() == 1 && self.0[0] == value
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Appends a value.
    pub fn push(&mut self, value: impl Into<String>) {
        self.0.push(value.into());
    }
}

/// Form-encoded request parameters, possibly multi-valued per key.
///
/// `get` returns the first value for a key, or `""` when the key is absent,
/// matching HTML form semantics.
#[derive(Debug, Clone, Default)]
pub struct RequestForm {
    values: HashMap<String, Vec<String>>,
}

impl RequestForm {
    /// Creates an empty form.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a form from key-value pairs. Repeated keys accumulate.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut form = Self::new();
        for (key, value) in pairs {
            form.add(key, value);
        }
        form
    }

    /// Replaces all values for `key` with `value`.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), vec![value.into()]);
    }

    /// Appends `value` to the values for `key`.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.entry(key.into()).or_default().push(value.into());
    }

    /// Returns the first value for `key`, or `""` when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> &str {
        self.values
            .get(key)
            .and_then(|v| v.first())
            .map_or("", String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_membership() {
        let args = Arguments::new(["openid", "pinniped:request-audience"]);
        assert!(args.has("openid"));
        assert!(!args.has("offline_access"));
        assert_eq!(args.len(), 2);
        assert!(!args.is_empty());
    }

    #[test]
    fn arguments_exact_one() {
        let one = Arguments::new([GRANT_TYPE_TOKEN_EXCHANGE]);
        assert!(one.exact_one(GRANT_TYPE_TOKEN_EXCHANGE));

        let mut two = one.clone();
        two.push("refresh_token");
        assert!(!two.exact_one(GRANT_TYPE_TOKEN_EXCHANGE));

        assert!(!Arguments::default().exact_one(GRANT_TYPE_TOKEN_EXCHANGE));
    }

    #[test]
    fn form_returns_first_value_or_empty() {
        let mut form = RequestForm::new();
        form.add("audience", "cluster-a");
        form.add("audience", "cluster-b");

        assert_eq!(form.get("audience"), "cluster-a");
        assert_eq!(form.get("missing"), "");

        form.set("audience", "cluster-c");
        assert_eq!(form.get("audience"), "cluster-c");
    }
}
