//! The RFC 8693 token-exchange handler.
//!
//! Exchanges a previously issued access token for a short-lived ID token
//! whose audience is a downstream workload cluster. The handler enforces a
//! narrow contract on top of the general framework: client identity
//! continuity, scope gating, audience-name reservation, and session
//! integrity, before minting the downscoped JWT.

use std::sync::Arc;

use crate::error::{OauthError, OauthResult};
use crate::oauth::{
    AccessRequest, AccessResponse, AccessTokenStorage, AccessTokenStrategy, IdTokenStrategy,
    StoredRequest,
};
use crate::session::FederationSession;
use crate::types::{
    RequestForm, CLI_CLIENT_ID, GRANT_TYPE_TOKEN_EXCHANGE, RESERVED_AUDIENCE_MARKER,
    SCOPE_OPENID, SCOPE_REQUEST_AUDIENCE, SCOPE_USERNAME, TOKEN_TYPE_ACCESS_TOKEN,
    TOKEN_TYPE_JWT, TOKEN_TYPE_NOT_APPLICABLE,
};

fn invalid_subject_token() -> OauthError {
    OauthError::RequestUnauthorized("Invalid 'subject_token' parameter value.".to_string())
}

/// The RFC 8693 parameters this exchange supports.
struct StsParams {
    subject_access_token: String,
    requested_audience: String,
}

/// Token-endpoint handler for the token-exchange grant.
pub struct TokenExchangeHandler {
    id_token_strategy: Arc<dyn IdTokenStrategy>,
    access_token_strategy: Arc<dyn AccessTokenStrategy>,
    access_token_storage: Arc<dyn AccessTokenStorage>,
}

impl TokenExchangeHandler {
    /// Creates a handler over the framework's strategies and storage.
    #[must_use]
    pub fn new(
        id_token_strategy: Arc<dyn IdTokenStrategy>,
        access_token_strategy: Arc<dyn AccessTokenStrategy>,
        access_token_storage: Arc<dyn AccessTokenStorage>,
    ) -> Self {
        Self {
            id_token_strategy,
            access_token_strategy,
            access_token_storage,
        }
    }

    /// Whether this handler is responsible for the request: the requested
    /// grant types must be exactly the token-exchange grant.
    #[must_use]
    pub fn can_handle_token_endpoint_request(&self, requester: &AccessRequest) -> bool {
        requester.grant_types.exact_one(GRANT_TYPE_TOKEN_EXCHANGE)
    }

    /// Client authentication is never skipped for token exchange.
    #[must_use]
    pub const fn can_skip_client_auth(&self, _requester: &AccessRequest) -> bool {
        false
    }

    /// Gates the request on the grant type.
    ///
    /// # Errors
    ///
    /// Returns [`OauthError::UnknownRequest`] for any other grant type, so
    /// the surrounding framework can try its other handlers.
    pub fn handle_token_endpoint_request(&self, requester: &AccessRequest) -> OauthResult<()> {
        if !self.can_handle_token_endpoint_request(requester) {
            return Err(OauthError::UnknownRequest);
        }
        Ok(())
    }

    /// Runs the exchange and populates the response.
    ///
    /// # Errors
    ///
    /// Returns the mapped OAuth error for any failed check; any failure
    /// short-circuits the remaining steps.
    pub async fn populate_token_endpoint_response(
        &self,
        requester: &AccessRequest,
        responder: &mut AccessResponse,
    ) -> OauthResult<()> {
        // Skip this request if it's for a different grant type.
        self.handle_token_endpoint_request(requester)?;

        let params = validate_params(&requester.form)?;

        // Validate the incoming access token and look up the information
        // about the original authorize request.
        let original = self
            .validate_access_token(&params.subject_access_token)
            .await?;

        // The currently authenticated client must be the client which was
        // originally used to get the access token.
        if original.client_id != requester.client.id {
            return Err(OauthError::InvalidGrant(
                "The OAuth 2.0 Client ID from this request does not match the one from the authorize request."
                    .to_string(),
            ));
        }

        if !requester.client.grant_types.has(GRANT_TYPE_TOKEN_EXCHANGE) {
            return Err(OauthError::UnauthorizedClient(format!(
                r#"The OAuth 2.0 Client is not allowed to use token exchange grant "{GRANT_TYPE_TOKEN_EXCHANGE}"."#
            )));
        }

        // The incoming access token must have been granted both the
        // request-audience and OpenID scopes.
        if !original.granted_scopes.has(SCOPE_REQUEST_AUDIENCE) {
            return Err(OauthError::AccessDenied(format!(
                r#"Missing the "{SCOPE_REQUEST_AUDIENCE}" scope."#
            )));
        }
        if !original.granted_scopes.has(SCOPE_OPENID) {
            return Err(OauthError::AccessDenied(format!(
                r#"Missing the "{SCOPE_OPENID}" scope."#
            )));
        }

        validate_session(&original)?;

        let response_token = self.mint_jwt(&original, &params.requested_audience).await?;

        // Format the response parameters according to RFC 8693.
        responder.set_access_token(response_token);
        responder.set_token_type(TOKEN_TYPE_NOT_APPLICABLE);
        responder.set_extra("issued_token_type", TOKEN_TYPE_JWT);
        Ok(())
    }

    /// Mints a new ID token from the original session, downscoped to the
    /// requested audience by overwriting the client id.
    async fn mint_jwt(&self, original: &StoredRequest, audience: &str) -> OauthResult<String> {
        let downscoped = AccessRequest::for_session(Arc::clone(&original.session), audience);
        self.id_token_strategy.generate_id_token(&downscoped).await
    }

    /// Resolves the subject access token to its original authorize request
    /// and validates it against the stored session.
    ///
    /// A missing token and a failed storage read are indistinguishable to
    /// the caller, so the error response cannot be used as an oracle into
    /// backend health.
    async fn validate_access_token(&self, access_token: &str) -> OauthResult<StoredRequest> {
        let signature = self.access_token_strategy.access_token_signature(access_token);
        let original = self
            .access_token_storage
            .get_access_token_session(&signature)
            .await
            .map_err(|_| invalid_subject_token())?
            .ok_or_else(invalid_subject_token)?;
        self.access_token_strategy
            .validate_access_token(&original, access_token)
            .await?;
        Ok(original)
    }
}

/// Checks that the stored session meets the minimum requirements for token
/// exchange: it has the expected shape and carries a username claim.
fn validate_session(original: &StoredRequest) -> OauthResult<()> {
    let session = FederationSession::from_session(original.session.as_ref())?;
    if session.username().is_none() {
        // The username is only stored in the session's ID-token claims when
        // the username scope was requested and granted.
        return Err(OauthError::AccessDenied(format!(
            r#"No username found in session. Ensure that the "{SCOPE_USERNAME}" scope was requested and granted at the authorization endpoint."#
        )));
    }
    Ok(())
}

fn validate_params(form: &RequestForm) -> OauthResult<StsParams> {
    // Required parameters.
    let requested_audience = form.get("audience");
    if requested_audience.is_empty() {
        return Err(OauthError::InvalidRequest(
            "Missing 'audience' parameter.".to_string(),
        ));
    }
    let subject_access_token = form.get("subject_token");
    if subject_access_token.is_empty() {
        return Err(OauthError::InvalidRequest(
            "Missing 'subject_token' parameter.".to_string(),
        ));
    }

    // Parameters with the single value this exchange supports.
    if form.get("subject_token_type") != TOKEN_TYPE_ACCESS_TOKEN {
        return Err(OauthError::InvalidRequest(format!(
            r#"Unsupported 'subject_token_type' parameter value, must be "{TOKEN_TYPE_ACCESS_TOKEN}"."#
        )));
    }
    if form.get("requested_token_type") != TOKEN_TYPE_JWT {
        return Err(OauthError::InvalidRequest(format!(
            r#"Unsupported 'requested_token_type' parameter value, must be "{TOKEN_TYPE_JWT}"."#
        )));
    }

    // Optional RFC 8693 parameters this exchange does not support.
    for param in ["resource", "scope", "actor_token", "actor_token_type"] {
        if !form.get(param).is_empty() {
            return Err(OauthError::InvalidRequest(format!(
                r#"Unsupported parameter "{param}"."#
            )));
        }
    }

    // All possible audience strings are subdivided into these
    // classifications:
    // 1. The CLI client id names the statically defined OAuth client.
    // 2. Anything containing the reserved marker names internal clients or
    //    is held back for future use.
    // 3. Any other string names a workload cluster's token validator, the
    //    only values allowed here.
    // The checks are byte-for-byte on the raw form value.
    if requested_audience.contains(RESERVED_AUDIENCE_MARKER) {
        return Err(OauthError::InvalidRequest(format!(
            "requested audience cannot contain '{RESERVED_AUDIENCE_MARKER}'"
        )));
    }
    if requested_audience == CLI_CLIENT_ID {
        return Err(OauthError::InvalidRequest(format!(
            "requested audience cannot equal '{CLI_CLIENT_ID}'"
        )));
    }

    Ok(StsParams {
        subject_access_token: subject_access_token.to_string(),
        requested_audience: requested_audience.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use chrono::{Duration, Utc};
    use jsonwebtoken::{Algorithm, DecodingKey, Validation};

    use super::*;
    use crate::claims::IdTokenClaims;
    use crate::oauth::{Client, InMemoryAccessTokenStorage, Session};
    use crate::token::{HmacAccessTokenStrategy, JwtIdTokenMinter};
    use crate::types::Arguments;

    const TEST_SECRET: &[u8] = b"an-hmac-test-secret-32-bytes-long";
    const TEST_CLIENT_ID: &str = "test-client";
    const TEST_ISSUER: &str = "https://issuer.example.com";

    struct Fixture {
        handler: TokenExchangeHandler,
        strategy: Arc<HmacAccessTokenStrategy>,
        storage: Arc<InMemoryAccessTokenStorage>,
    }

    fn fixture() -> Fixture {
        let strategy = Arc::new(HmacAccessTokenStrategy::new(TEST_SECRET));
        let storage = Arc::new(InMemoryAccessTokenStorage::new());
        let minter = Arc::new(JwtIdTokenMinter::hs256(TEST_ISSUER, TEST_SECRET));
        let handler = TokenExchangeHandler::new(minter, strategy.clone(), storage.clone());
        Fixture {
            handler,
            strategy,
            storage,
        }
    }

    fn session_with_username(username: Option<&str>) -> FederationSession {
        let mut claims = IdTokenClaims::new(
            TEST_ISSUER,
            "some-subject",
            Utc::now() + Duration::minutes(5),
        );
        if let Some(username) = username {
            claims = claims.with_username(username);
        }
        FederationSession::new(claims)
            .with_access_token_expiry(Utc::now() + Duration::minutes(2))
    }

    fn granted_scopes() -> Arguments {
        Arguments::new([SCOPE_OPENID, SCOPE_REQUEST_AUDIENCE, SCOPE_USERNAME])
    }

    async fn issue_token(fixture: &Fixture, session: Arc<dyn Session>, scopes: Arguments) -> String {
        let token = fixture.strategy.generate().unwrap();
        let signature = fixture.strategy.access_token_signature(&token);
        fixture
            .storage
            .store(
                &signature,
                StoredRequest {
                    client_id: TEST_CLIENT_ID.to_string(),
                    granted_scopes: scopes,
                    session,
                },
            )
            .await;
        token
    }

    fn exchange_request(subject_token: &str, audience: &str) -> AccessRequest {
        let mut form = RequestForm::new();
        form.set("audience", audience);
        form.set("subject_token", subject_token);
        form.set("subject_token_type", TOKEN_TYPE_ACCESS_TOKEN);
        form.set("requested_token_type", TOKEN_TYPE_JWT);
        AccessRequest::new(
            Arguments::new([GRANT_TYPE_TOKEN_EXCHANGE]),
            Client {
                id: TEST_CLIENT_ID.to_string(),
                grant_types: Arguments::new([GRANT_TYPE_TOKEN_EXCHANGE]),
            },
            form,
            Arc::new(session_with_username(None)),
        )
    }

    async fn run(
        fixture: &Fixture,
        request: &AccessRequest,
    ) -> OauthResult<AccessResponse> {
        let mut response = AccessResponse::new();
        fixture
            .handler
            .populate_token_endpoint_response(request, &mut response)
            .await?;
        Ok(response)
    }

    #[tokio::test]
    async fn exchanges_an_access_token_for_an_audience_scoped_jwt() {
        let fixture = fixture();
        let token = issue_token(
            &fixture,
            Arc::new(session_with_username(Some("alice"))),
            granted_scopes(),
        )
        .await;

        let response = run(&fixture, &exchange_request(&token, "cluster-a"))
            .await
            .unwrap();

        assert_eq!(response.token_type, TOKEN_TYPE_NOT_APPLICABLE);
        assert_eq!(
            response.extra("issued_token_type").unwrap(),
            TOKEN_TYPE_JWT
        );

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["cluster-a"]);
        let decoded = jsonwebtoken::decode::<IdTokenClaims>(
            &response.access_token,
            &DecodingKey::from_secret(TEST_SECRET),
            &validation,
        )
        .unwrap();
        assert_eq!(decoded.claims.aud.as_deref(), Some("cluster-a"));
        assert_eq!(decoded.claims.username(), Some("alice"));
    }

    #[tokio::test]
    async fn other_grant_types_are_not_handled() {
        let fixture = fixture();
        let mut request = exchange_request("irrelevant", "cluster-a");
        request.grant_types = Arguments::new(["authorization_code"]);

        let err = run(&fixture, &request).await.unwrap_err();
        assert!(matches!(err, OauthError::UnknownRequest));
        assert!(!fixture.handler.can_handle_token_endpoint_request(&request));
    }

    #[tokio::test]
    async fn multiple_grant_types_are_not_handled() {
        let fixture = fixture();
        let mut request = exchange_request("irrelevant", "cluster-a");
        request
            .grant_types
            .push("refresh_token");

        let err = run(&fixture, &request).await.unwrap_err();
        assert!(matches!(err, OauthError::UnknownRequest));
    }

    #[tokio::test]
    async fn client_auth_is_never_skipped() {
        let fixture = fixture();
        let request = exchange_request("irrelevant", "cluster-a");
        assert!(!fixture.handler.can_skip_client_auth(&request));
    }

    #[tokio::test]
    async fn missing_audience_is_rejected() {
        let fixture = fixture();
        let mut request = exchange_request("irrelevant", "unused");
        request.form.set("audience", "");

        let err = run(&fixture, &request).await.unwrap_err();
        assert!(matches!(err, OauthError::InvalidRequest(_)));
        assert_eq!(err.hint(), "Missing 'audience' parameter.");
    }

    #[tokio::test]
    async fn missing_subject_token_is_rejected() {
        let fixture = fixture();
        let mut request = exchange_request("", "cluster-a");
        request.form.set("subject_token", "");

        let err = run(&fixture, &request).await.unwrap_err();
        assert_eq!(err.hint(), "Missing 'subject_token' parameter.");
    }

    #[tokio::test]
    async fn wrong_subject_token_type_is_rejected() {
        let fixture = fixture();
        let mut request = exchange_request("irrelevant", "cluster-a");
        request.form.set("subject_token_type", TOKEN_TYPE_JWT);

        let err = run(&fixture, &request).await.unwrap_err();
        assert_eq!(
            err.hint(),
            r#"Unsupported 'subject_token_type' parameter value, must be "urn:ietf:params:oauth:token-type:access_token"."#
        );
    }

    #[tokio::test]
    async fn wrong_requested_token_type_is_rejected() {
        let fixture = fixture();
        let mut request = exchange_request("irrelevant", "cluster-a");
        request
            .form
            .set("requested_token_type", TOKEN_TYPE_ACCESS_TOKEN);

        let err = run(&fixture, &request).await.unwrap_err();
        assert_eq!(
            err.hint(),
            r#"Unsupported 'requested_token_type' parameter value, must be "urn:ietf:params:oauth:token-type:jwt"."#
        );
    }

    #[tokio::test]
    async fn unsupported_optional_parameters_are_rejected() {
        for param in ["resource", "scope", "actor_token", "actor_token_type"] {
            let fixture = fixture();
            let mut request = exchange_request("irrelevant", "cluster-a");
            request.form.set(param, "anything");

            let err = run(&fixture, &request).await.unwrap_err();
            assert_eq!(err.hint(), format!(r#"Unsupported parameter "{param}"."#));
        }
    }

    #[tokio::test]
    async fn reserved_audience_marker_is_rejected_anywhere_in_the_audience() {
        for audience in [
            "foo.pinniped.dev/x",
            ".pinniped.dev",
            "prefix.pinniped.devsuffix",
        ] {
            let fixture = fixture();
            let request = exchange_request("irrelevant", audience);

            let err = run(&fixture, &request).await.unwrap_err();
            assert!(matches!(err, OauthError::InvalidRequest(_)));
            assert_eq!(
                err.hint(),
                "requested audience cannot contain '.pinniped.dev'"
            );
        }
    }

    #[tokio::test]
    async fn cli_client_id_is_not_a_valid_audience() {
        let fixture = fixture();
        let request = exchange_request("irrelevant", CLI_CLIENT_ID);

        let err = run(&fixture, &request).await.unwrap_err();
        assert_eq!(err.hint(), "requested audience cannot equal 'pinniped-cli'");
    }

    #[tokio::test]
    async fn audience_checks_are_case_sensitive_on_the_raw_bytes() {
        let fixture = fixture();
        let token = issue_token(
            &fixture,
            Arc::new(session_with_username(Some("alice"))),
            granted_scopes(),
        )
        .await;

        // Differs from the reserved names only by case, so it is allowed.
        let response = run(&fixture, &exchange_request(&token, "Pinniped-CLI"))
            .await
            .unwrap();
        assert!(!response.access_token.is_empty());
    }

    #[tokio::test]
    async fn unknown_subject_token_is_unauthorized() {
        let fixture = fixture();
        let token = fixture.strategy.generate().unwrap();

        let err = run(&fixture, &exchange_request(&token, "cluster-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::RequestUnauthorized(_)));
        assert_eq!(err.hint(), "Invalid 'subject_token' parameter value.");
    }

    #[tokio::test]
    async fn storage_failures_are_indistinguishable_from_unknown_tokens() {
        struct FailingStorage;

        #[async_trait::async_trait]
        impl AccessTokenStorage for FailingStorage {
            async fn get_access_token_session(
                &self,
                _signature: &str,
            ) -> OauthResult<Option<StoredRequest>> {
                Err(OauthError::ServerError("storage backend is down".to_string()))
            }
        }

        let strategy = Arc::new(HmacAccessTokenStrategy::new(TEST_SECRET));
        let minter = Arc::new(JwtIdTokenMinter::hs256(TEST_ISSUER, TEST_SECRET));
        let handler =
            TokenExchangeHandler::new(minter, strategy.clone(), Arc::new(FailingStorage));
        let token = strategy.generate().unwrap();

        let mut response = AccessResponse::new();
        let err = handler
            .populate_token_endpoint_response(&exchange_request(&token, "cluster-a"), &mut response)
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::RequestUnauthorized(_)));
        assert_eq!(err.hint(), "Invalid 'subject_token' parameter value.");
    }

    #[tokio::test]
    async fn expired_subject_token_is_unauthorized() {
        let fixture = fixture();
        let session = FederationSession::new(
            IdTokenClaims::new(
                TEST_ISSUER,
                "some-subject",
                Utc::now() + Duration::minutes(5),
            )
            .with_username("alice"),
        )
        .with_access_token_expiry(Utc::now() - Duration::minutes(2));
        let token = issue_token(&fixture, Arc::new(session), granted_scopes()).await;

        let err = run(&fixture, &exchange_request(&token, "cluster-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::RequestUnauthorized(_)));
    }

    #[tokio::test]
    async fn client_id_must_match_the_original_request() {
        let fixture = fixture();
        let token = issue_token(
            &fixture,
            Arc::new(session_with_username(Some("alice"))),
            granted_scopes(),
        )
        .await;

        let mut request = exchange_request(&token, "cluster-a");
        request.client.id = "some-other-client".to_string();

        let err = run(&fixture, &request).await.unwrap_err();
        assert!(matches!(err, OauthError::InvalidGrant(_)));
        assert_eq!(
            err.hint(),
            "The OAuth 2.0 Client ID from this request does not match the one from the authorize request."
        );
    }

    #[tokio::test]
    async fn client_must_be_allowed_the_token_exchange_grant() {
        let fixture = fixture();
        let token = issue_token(
            &fixture,
            Arc::new(session_with_username(Some("alice"))),
            granted_scopes(),
        )
        .await;

        let mut request = exchange_request(&token, "cluster-a");
        request.client.grant_types = Arguments::new(["authorization_code"]);

        let err = run(&fixture, &request).await.unwrap_err();
        assert!(matches!(err, OauthError::UnauthorizedClient(_)));
        assert_eq!(
            err.hint(),
            r#"The OAuth 2.0 Client is not allowed to use token exchange grant "urn:ietf:params:oauth:grant-type:token-exchange"."#
        );
    }

    #[tokio::test]
    async fn missing_request_audience_scope_is_denied() {
        let fixture = fixture();
        let token = issue_token(
            &fixture,
            Arc::new(session_with_username(Some("alice"))),
            Arguments::new([SCOPE_OPENID, SCOPE_USERNAME]),
        )
        .await;

        let err = run(&fixture, &exchange_request(&token, "cluster-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::AccessDenied(_)));
        assert_eq!(
            err.hint(),
            r#"Missing the "pinniped:request-audience" scope."#
        );
    }

    #[tokio::test]
    async fn missing_openid_scope_is_denied() {
        let fixture = fixture();
        let token = issue_token(
            &fixture,
            Arc::new(session_with_username(Some("alice"))),
            Arguments::new([SCOPE_REQUEST_AUDIENCE, SCOPE_USERNAME]),
        )
        .await;

        let err = run(&fixture, &exchange_request(&token, "cluster-a"))
            .await
            .unwrap_err();
        assert_eq!(err.hint(), r#"Missing the "openid" scope."#);
    }

    #[tokio::test]
    async fn session_without_a_username_is_denied() {
        let fixture = fixture();
        let token = issue_token(
            &fixture,
            Arc::new(session_with_username(None)),
            granted_scopes(),
        )
        .await;

        let err = run(&fixture, &exchange_request(&token, "cluster-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::AccessDenied(_)));
        assert_eq!(
            err.hint(),
            r#"No username found in session. Ensure that the "username" scope was requested and granted at the authorization endpoint."#
        );
    }

    #[tokio::test]
    async fn unexpected_session_shape_is_a_server_error() {
        struct OtherSession;
        impl Session for OtherSession {
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let fixture = fixture();
        let token = issue_token(&fixture, Arc::new(OtherSession), granted_scopes()).await;

        let err = run(&fixture, &exchange_request(&token, "cluster-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, OauthError::ServerError(_)));
        assert_eq!(err.hint(), "Invalid session storage.");
    }
}
