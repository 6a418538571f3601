//! Authorization request validation and redirect assembly.
//!
//! Validation order matters: the redirect URI is checked first (exact string
//! match against the registration), because only a validated redirect URI may
//! receive error redirects — everything else returns JSON to the caller.

use serde::Deserialize;
use url::Url;

use crate::error::{AuthError, AuthResult};
use crate::oauth::pkce;
use crate::policy::ResolvedPolicy;
use crate::types::ClientContract;

/// Raw `/authorize` parameters (query or resolved from PAR/request object).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizeParams {
    /// Client ID.
    #[serde(default)]
    pub client_id: Option<String>,

    /// Redirect URI.
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// Response type; only "code".
    #[serde(default)]
    pub response_type: Option<String>,

    /// Requested scopes.
    #[serde(default)]
    pub scope: Option<String>,

    /// Opaque client state, echoed on the redirect.
    #[serde(default)]
    pub state: Option<String>,

    /// ID-token nonce.
    #[serde(default)]
    pub nonce: Option<String>,

    /// PKCE challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// PKCE method; only "S256".
    #[serde(default)]
    pub code_challenge_method: Option<String>,

    /// Space-separated prompt directives.
    #[serde(default)]
    pub prompt: Option<String>,

    /// Maximum authentication age in seconds.
    #[serde(default)]
    pub max_age: Option<u64>,

    /// Requested ACR values.
    #[serde(default)]
    pub acr_values: Option<String>,

    /// Login hint.
    #[serde(default)]
    pub login_hint: Option<String>,

    /// Inline request object (RFC 9101).
    #[serde(default)]
    pub request: Option<String>,

    /// Request URI (PAR URN or https).
    #[serde(default)]
    pub request_uri: Option<String>,
}

impl AuthorizeParams {
    /// Merges parameters resolved from a PAR record or request object over
    /// the query parameters. Resolved values win; `client_id` must agree.
    ///
    /// # Errors
    ///
    /// `invalid_request` on a client_id mismatch.
    pub fn merge_resolved(
        mut self,
        resolved: std::collections::HashMap<String, String>,
    ) -> AuthResult<Self> {
        if let (Some(outer), Some(inner)) = (&self.client_id, resolved.get("client_id")) {
            if outer != inner {
                return Err(AuthError::invalid_request(
                    "client_id differs between request and resolved parameters",
                ));
            }
        }
        let mut set = |field: &mut Option<String>, key: &str| {
            if let Some(value) = resolved.get(key) {
                *field = Some(value.clone());
            }
        };
        set(&mut self.client_id, "client_id");
        set(&mut self.redirect_uri, "redirect_uri");
        set(&mut self.response_type, "response_type");
        set(&mut self.scope, "scope");
        set(&mut self.state, "state");
        set(&mut self.nonce, "nonce");
        set(&mut self.code_challenge, "code_challenge");
        set(&mut self.code_challenge_method, "code_challenge_method");
        set(&mut self.prompt, "prompt");
        set(&mut self.acr_values, "acr_values");
        set(&mut self.login_hint, "login_hint");
        if let Some(value) = resolved.get("max_age") {
            self.max_age = value.parse().ok();
        }
        // A resolved request never chains another reference.
        self.request = None;
        self.request_uri = None;
        Ok(self)
    }
}

/// Parsed prompt directives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Prompt {
    /// `prompt=none`: no interaction permitted.
    pub none: bool,

    /// `prompt=login`: force re-authentication.
    pub login: bool,

    /// `prompt=consent`: force the consent prompt.
    pub consent: bool,
}

impl Prompt {
    /// Parses the space-separated directive list.
    ///
    /// # Errors
    ///
    /// `invalid_request` when `none` is combined with other directives.
    pub fn parse(raw: Option<&str>) -> AuthResult<Self> {
        let mut prompt = Self::default();
        let Some(raw) = raw else {
            return Ok(prompt);
        };
        for directive in raw.split_whitespace() {
            match directive {
                "none" => prompt.none = true,
                "login" => prompt.login = true,
                "consent" => prompt.consent = true,
                // select_account and unknown values are ignored per OIDC
                // Core §3.1.2.1 for values the OP does not support.
                _ => {}
            }
        }
        if prompt.none && (prompt.login || prompt.consent) {
            return Err(AuthError::invalid_request(
                "prompt=none cannot be combined with other prompts",
            ));
        }
        Ok(prompt)
    }
}

/// A fully validated authorization request, ready to drive a flow.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidatedAuthorizeRequest {
    /// Client ID.
    pub client_id: String,

    /// Validated redirect URI (exact registration match).
    pub redirect_uri: String,

    /// Requested scopes filtered to the policy set.
    pub scopes: Vec<String>,

    /// Client state for the redirect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// ID-token nonce.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// PKCE challenge (S256), when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// Requested ACR values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr_values: Option<String>,

    /// Login hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_hint: Option<String>,

    /// `prompt=none`.
    pub prompt_none: bool,

    /// `prompt=login`.
    pub prompt_login: bool,

    /// `prompt=consent`.
    pub prompt_consent: bool,

    /// `max_age` in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
}

/// Validates merged parameters against the client registration and resolved
/// policy.
///
/// # Errors
///
/// The first violated rule, as the protocol error the caller maps onto a
/// redirect or a JSON body.
pub fn validate(
    params: &AuthorizeParams,
    client: &ClientContract,
    policy: &ResolvedPolicy,
) -> AuthResult<ValidatedAuthorizeRequest> {
    let redirect_uri = params
        .redirect_uri
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("redirect_uri is required"))?;
    if !client.has_redirect_uri(redirect_uri) {
        return Err(AuthError::invalid_request("redirect_uri is not registered"));
    }

    let response_type = params
        .response_type
        .as_deref()
        .ok_or_else(|| AuthError::invalid_request("response_type is required"))?;
    if response_type != "code" || !policy.response_types.iter().any(|r| r == "code") {
        return Err(AuthError::invalid_request(
            "only response_type=code is supported",
        ));
    }

    let scope = params
        .scope
        .as_deref()
        .ok_or_else(|| AuthError::invalid_scope("scope is required"))?;
    let scopes = policy.filter_scopes(scope);
    if scopes.is_empty() {
        return Err(AuthError::invalid_scope("no requested scope is permitted"));
    }

    // PKCE: mandatory for public clients, S256 only.
    let code_challenge = match (&params.code_challenge, &params.code_challenge_method) {
        (Some(challenge), method) => {
            pkce::parse_method(method.as_deref().unwrap_or("plain"))
                .map_err(|e| AuthError::invalid_request(e.to_string()))?;
            let challenge = pkce::PkceChallenge::new(challenge.clone())
                .map_err(|e| AuthError::invalid_request(e.to_string()))?;
            Some(challenge.as_str().to_string())
        }
        (None, _) => {
            if policy.require_pkce {
                return Err(AuthError::invalid_request(
                    "PKCE code_challenge is required for this client",
                ));
            }
            None
        }
    };

    let prompt = Prompt::parse(params.prompt.as_deref())?;

    Ok(ValidatedAuthorizeRequest {
        client_id: client.client_id.clone(),
        redirect_uri: redirect_uri.to_string(),
        scopes,
        state: params.state.clone(),
        nonce: params.nonce.clone(),
        code_challenge,
        acr_values: params.acr_values.clone(),
        login_hint: params.login_hint.clone(),
        prompt_none: prompt.none,
        prompt_login: prompt.login,
        prompt_consent: prompt.consent,
        max_age: params.max_age,
    })
}

/// Appends `code` and `state` to a validated redirect URI.
///
/// # Errors
///
/// `server_error` when the stored redirect URI no longer parses.
pub fn success_redirect(
    redirect_uri: &str,
    code: &str,
    state: Option<&str>,
) -> AuthResult<String> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| AuthError::server_error(format!("stored redirect_uri invalid: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("code", code);
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.into())
}

/// Appends `error`, `error_description`, and `state` to a validated redirect
/// URI.
///
/// # Errors
///
/// `server_error` when the stored redirect URI no longer parses.
pub fn error_redirect(
    redirect_uri: &str,
    error: &str,
    description: Option<&str>,
    state: Option<&str>,
) -> AuthResult<String> {
    let mut url = Url::parse(redirect_uri)
        .map_err(|e| AuthError::server_error(format!("stored redirect_uri invalid: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("error", error);
        if let Some(description) = description {
            query.append_pair("error_description", description);
        }
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support;
    use crate::types::TenantContract;

    fn fixtures() -> (ClientContract, ResolvedPolicy) {
        let tenant = TenantContract::new("acme", 1, "https://issuer.example");
        let client = ClientContract::public(
            "public-spa",
            &tenant,
            vec!["https://app.example/cb".to_string()],
        );
        (client, test_support::policy())
    }

    fn params() -> AuthorizeParams {
        AuthorizeParams {
            client_id: Some("public-spa".into()),
            redirect_uri: Some("https://app.example/cb".into()),
            response_type: Some("code".into()),
            scope: Some("openid profile".into()),
            state: Some("xyz".into()),
            nonce: Some("n-abc".into()),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".into()),
            code_challenge_method: Some("S256".into()),
            ..AuthorizeParams::default()
        }
    }

    #[test]
    fn test_happy_path_validation() {
        let (client, policy) = fixtures();
        let validated = validate(&params(), &client, &policy).unwrap();
        assert_eq!(validated.scopes, vec!["openid".to_string(), "profile".to_string()]);
        assert_eq!(validated.state.as_deref(), Some("xyz"));
        assert!(validated.code_challenge.is_some());
        assert!(!validated.prompt_none);
    }

    #[test]
    fn test_redirect_uri_exact_match_required() {
        let (client, policy) = fixtures();
        let mut p = params();
        p.redirect_uri = Some("https://app.example/cb/".into());
        assert!(validate(&p, &client, &policy).is_err());

        p.redirect_uri = Some("https://app.example/other".into());
        assert!(validate(&p, &client, &policy).is_err());
    }

    #[test]
    fn test_public_client_requires_pkce() {
        let (client, policy) = fixtures();
        let mut p = params();
        p.code_challenge = None;
        p.code_challenge_method = None;
        let err = validate(&p, &client, &policy).unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_request");
    }

    #[test]
    fn test_plain_pkce_rejected() {
        let (client, policy) = fixtures();
        let mut p = params();
        p.code_challenge_method = Some("plain".into());
        assert!(validate(&p, &client, &policy).is_err());
        // Missing method defaults to plain and is rejected too.
        p.code_challenge_method = None;
        assert!(validate(&p, &client, &policy).is_err());
    }

    #[test]
    fn test_scope_filtering() {
        let (client, policy) = fixtures();
        let mut p = params();
        p.scope = Some("openid admin:write".into());
        let validated = validate(&p, &client, &policy).unwrap();
        assert_eq!(validated.scopes, vec!["openid".to_string()]);

        p.scope = Some("admin:write".into());
        let err = validate(&p, &client, &policy).unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_scope");
    }

    #[test]
    fn test_response_type_must_be_code() {
        let (client, policy) = fixtures();
        let mut p = params();
        p.response_type = Some("token".into());
        assert!(validate(&p, &client, &policy).is_err());
    }

    #[test]
    fn test_prompt_parsing() {
        let p = Prompt::parse(Some("login consent")).unwrap();
        assert!(p.login && p.consent && !p.none);

        let p = Prompt::parse(Some("none")).unwrap();
        assert!(p.none);

        assert!(Prompt::parse(Some("none login")).is_err());
        assert!(Prompt::parse(Some("select_account unknown")).is_ok());
    }

    #[test]
    fn test_merge_resolved_overrides_and_clears_references() {
        let mut resolved = std::collections::HashMap::new();
        resolved.insert("scope".to_string(), "openid".to_string());
        resolved.insert("state".to_string(), "inner".to_string());

        let mut p = params();
        p.request_uri = Some("urn:ietf:params:oauth:request_uri:abc".into());
        let merged = p.merge_resolved(resolved).unwrap();
        assert_eq!(merged.scope.as_deref(), Some("openid"));
        assert_eq!(merged.state.as_deref(), Some("inner"));
        assert!(merged.request_uri.is_none());
    }

    #[test]
    fn test_merge_rejects_client_swap() {
        let mut resolved = std::collections::HashMap::new();
        resolved.insert("client_id".to_string(), "attacker".to_string());
        assert!(params().merge_resolved(resolved).is_err());
    }

    #[test]
    fn test_redirect_assembly() {
        let success = success_redirect("https://app.example/cb", "C0DE", Some("xyz")).unwrap();
        assert_eq!(success, "https://app.example/cb?code=C0DE&state=xyz");

        let error =
            error_redirect("https://app.example/cb", "access_denied", Some("denied"), Some("xyz"))
                .unwrap();
        assert!(error.contains("error=access_denied"));
        assert!(error.contains("error_description=denied"));
        assert!(error.contains("state=xyz"));
    }

    #[test]
    fn test_redirect_preserves_existing_query() {
        let success = success_redirect("https://app.example/cb?foo=bar", "C", None).unwrap();
        assert_eq!(success, "https://app.example/cb?foo=bar&code=C");
    }
}
