//! Scope-filtered claim assembly for `/userinfo`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::policy::ContractRegistry;
use crate::stores::UserStore;
use crate::token::claims::AccessTokenClaims;
use crate::token::issuer::{TokenIssuer, VerifyExpectations};
use crate::token::jwe;

/// The userinfo response body. Claims appear only when the access token's
/// scopes cover them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserInfoResponse {
    /// Subject; always present.
    pub sub: String,

    /// Display name (`profile` scope).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Last profile update in seconds (`profile` scope).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,

    /// Email address (`email` scope).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether the address was proven (`email` scope).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,

    /// Phone number (`phone` scope).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// How the response should be delivered.
#[derive(Debug, Clone)]
pub enum UserInfoDelivery {
    /// Plain JSON.
    Json(UserInfoResponse),
    /// Compact JWE (`application/jwt`), per the client contract.
    Encrypted(String),
}

/// Serves `/userinfo`.
pub struct UserInfoService {
    issuer: Arc<TokenIssuer>,
    users: Arc<dyn UserStore>,
    registry: Arc<ContractRegistry>,
}

impl UserInfoService {
    /// Wires the service.
    #[must_use]
    pub fn new(
        issuer: Arc<TokenIssuer>,
        users: Arc<dyn UserStore>,
        registry: Arc<ContractRegistry>,
    ) -> Self {
        Self {
            issuer,
            users,
            registry,
        }
    }

    /// Verifies the bearer token and assembles the filtered claims.
    ///
    /// # Errors
    ///
    /// `invalid_token` for a bad bearer; `access_denied` when `openid` is
    /// missing from the token's scopes.
    pub async fn handle(&self, bearer: &str) -> AuthResult<UserInfoDelivery> {
        let claims: AccessTokenClaims = self
            .issuer
            .verify(bearer, &VerifyExpectations::default())
            .await?;

        let scopes: Vec<&str> = claims.scope.split_whitespace().collect();
        if !scopes.contains(&"openid") {
            return Err(AuthError::access_denied(
                "access token lacks the openid scope",
            ));
        }

        let mut response = UserInfoResponse {
            sub: claims.sub.clone(),
            ..UserInfoResponse::default()
        };

        // Client-credentials tokens have a non-UUID subject and no PII.
        if let Ok(user_id) = Uuid::parse_str(&claims.sub) {
            if let Some(pii) = self.users.get_pii(user_id).await? {
                if scopes.contains(&"profile") {
                    response.name = pii.name.clone();
                    response.updated_at = Some(pii.updated_at.as_secs());
                }
                if scopes.contains(&"email") {
                    response.email = Some(pii.email.clone());
                    let core = self.users.get(user_id).await?;
                    response.email_verified = core.map(|c| c.email_verified);
                }
                if scopes.contains(&"phone") {
                    response.phone_number = pii.phone_number.clone();
                }
            }
        }

        // Signed-and-encrypted delivery when the client contract declares
        // it. The signed JWT carries iss and aud per OIDC Core §5.3.2, then
        // gets wrapped for the client's encryption key.
        if let Some(client) = self.registry.client(&claims.client_id) {
            if client.jwe_delivery.is_some() {
                let jwk = client
                    .jwks
                    .as_ref()
                    .and_then(|jwks| jwks.encryption_key().or_else(|| jwks.keys.first()))
                    .ok_or_else(|| {
                        AuthError::configuration(
                            "client declares encrypted delivery without an encryption key",
                        )
                    })?;
                let mut signed_claims = serde_json::to_value(&response)
                    .map_err(|e| AuthError::server_error(format!("userinfo encoding: {e}")))?;
                if let Some(object) = signed_claims.as_object_mut() {
                    object.insert("iss".to_string(), self.issuer.issuer_url().into());
                    object.insert("aud".to_string(), claims.client_id.clone().into());
                }
                let signed = self.issuer.sign_claims(&signed_claims).await?;
                return Ok(UserInfoDelivery::Encrypted(jwe::encrypt(&signed, jwk)?));
            }
        }

        Ok(UserInfoDelivery::Json(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_filtering_shape() {
        // Serialization drops everything absent.
        let response = UserInfoResponse {
            sub: "u1".into(),
            ..UserInfoResponse::default()
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json.as_object().unwrap().len(), 1);
        assert_eq!(json["sub"], "u1");

        let full = UserInfoResponse {
            sub: "u1".into(),
            name: Some("Alice".into()),
            updated_at: Some(1_700_000_000),
            email: Some("a@example.com".into()),
            email_verified: Some(true),
            phone_number: None,
        };
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["email_verified"], true);
        assert!(json.get("phone_number").is_none());
    }
}
