use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::error::ProvideErrorMetadata;
use aws_sdk_cognitoidentityprovider::types::{AttributeType, AuthFlowType};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

use super::models::{ProviderIdentity, SignUpOutcome};
use crate::config::CognitoConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("{0}")]
    AuthFailure(String),
    #[error("{0}")]
    DuplicateAccount(String),
}

impl AuthError {
    pub fn not_configured() -> Self {
        AuthError::AuthFailure("Email sign-in is not configured".to_string())
    }
}

/// Email/password account provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<SignUpOutcome, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<ProviderIdentity, AuthError>;
}

/// Email auth as wired at startup; `None` when no Cognito app client is configured.
#[derive(Clone, Default)]
pub struct EmailAuth {
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl EmailAuth {
    pub fn new(provider: Option<Arc<dyn IdentityProvider>>) -> Self {
        Self { provider }
    }

    pub fn disabled() -> Self {
        Self { provider: None }
    }

    pub fn provider(&self) -> Result<&dyn IdentityProvider, AuthError> {
        self.provider.as_deref().ok_or_else(AuthError::not_configured)
    }
}

#[derive(Clone)]
pub struct CognitoService {
    client: CognitoClient,
    client_id: String,
    client_secret: Option<String>,
}

impl CognitoService {
    pub fn new(client: CognitoClient, config: &CognitoConfig) -> Self {
        Self {
            client,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    fn secret_hash(&self, username: &str) -> Result<Option<String>, AuthError> {
        self.client_secret
            .as_deref()
            .map(|secret| compute_secret_hash(secret, username, &self.client_id))
            .transpose()
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ProviderIdentity, AuthError> {
        let output = self
            .client
            .get_user()
            .access_token(access_token)
            .send()
            .await
            .map_err(|e| provider_failure("GetUser", e.message(), &e))?;

        let mut identity = ProviderIdentity {
            uid: output.username().to_string(),
            email: None,
            display_name: None,
            photo_url: None,
        };
        for attribute in output.user_attributes() {
            let value = attribute.value().map(str::to_string);
            match attribute.name() {
                "sub" => {
                    if let Some(sub) = value {
                        identity.uid = sub;
                    }
                }
                "email" => identity.email = value,
                "name" => identity.display_name = value,
                "picture" => identity.photo_url = value,
                _ => {}
            }
        }
        Ok(identity)
    }
}

#[async_trait]
impl IdentityProvider for CognitoService {
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<SignUpOutcome, AuthError> {
        let attributes = [("email", email), ("name", display_name)]
            .into_iter()
            .map(|(name, value)| {
                AttributeType::builder()
                    .name(name)
                    .value(value)
                    .build()
                    .map_err(|e| AuthError::AuthFailure(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = self
            .client
            .sign_up()
            .client_id(&self.client_id)
            .set_secret_hash(self.secret_hash(email)?)
            .username(email)
            .password(password)
            .set_user_attributes(Some(attributes))
            .send()
            .await
            .map_err(|e| {
                let duplicate = e
                    .as_service_error()
                    .is_some_and(|service| service.is_username_exists_exception());
                let failure = provider_failure("SignUp", e.message(), &e);
                match failure {
                    AuthError::AuthFailure(message) if duplicate => AuthError::DuplicateAccount(message),
                    other => other,
                }
            })?;

        log::info!("Cognito sign-up for {} (confirmed: {})", output.user_sub(), output.user_confirmed());
        Ok(SignUpOutcome {
            uid: output.user_sub().to_string(),
            confirmed: output.user_confirmed(),
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<ProviderIdentity, AuthError> {
        let mut request = self
            .client
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", email)
            .auth_parameters("PASSWORD", password);
        if let Some(hash) = self.secret_hash(email)? {
            request = request.auth_parameters("SECRET_HASH", hash);
        }

        let output = request
            .send()
            .await
            .map_err(|e| provider_failure("InitiateAuth", e.message(), &e))?;

        let Some(access_token) = output.authentication_result().and_then(|r| r.access_token()) else {
            let challenge = output
                .challenge_name()
                .map(|c| c.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            log::warn!("Cognito sign-in requires unsupported challenge: {}", challenge);
            return Err(AuthError::AuthFailure(format!(
                "Sign-in requires an additional step ({}) that is not supported",
                challenge
            )));
        };

        self.fetch_identity(access_token).await
    }
}

fn provider_failure(operation: &str, message: Option<&str>, error: &dyn std::fmt::Debug) -> AuthError {
    log::warn!("Cognito {} failed: {:?}", operation, error);
    AuthError::AuthFailure(message.unwrap_or("Authentication failed").to_string())
}

/// `SECRET_HASH` for app clients that carry a secret: base64(HMAC-SHA256(secret, username + client_id)).
pub fn compute_secret_hash(client_secret: &str, username: &str, client_id: &str) -> Result<String, AuthError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(client_secret.as_bytes())
        .map_err(|e| AuthError::AuthFailure(format!("Invalid client secret: {}", e)))?;
    mac.update(username.as_bytes());
    mac.update(client_id.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hash_matches_known_hmac_sha256() {
        // RFC 4231 test case 2, with the message split into username and client id.
        let hash = compute_secret_hash("Jefe", "what do ya want ", "for nothing?").unwrap();
        assert_eq!(
            hex::encode(STANDARD.decode(&hash).unwrap()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        assert_eq!(hash, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn disabled_email_auth_reports_not_configured() {
        let err = EmailAuth::disabled().provider().err().unwrap();
        assert_eq!(err.to_string(), "Email sign-in is not configured");
    }
}
