use super::models::{Claims, ProviderIdentity, Session};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("JWT encoding error: {0}")]
    Encoding(#[from] jsonwebtoken::errors::Error),
    #[error("JWT decoding error: {0}")]
    Decoding(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token revoked")]
    TokenRevoked,
}

/// Issues and verifies session tokens. Signing out revokes the token id
/// until the token would have expired anyway.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    revoked: Arc<Mutex<HashMap<String, usize>>>,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
            revoked: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts a session for a provider-authenticated member.
    pub fn issue_member(&self, identity: &ProviderIdentity) -> Result<(String, Session), JwtError> {
        self.issue(Claims {
            sub: identity.uid.clone(),
            email: identity.email.clone(),
            name: identity.display_name.clone(),
            picture: identity.photo_url.clone(),
            anonymous: false,
            jti: String::new(),
            exp: 0,
            iat: 0,
        })
    }

    /// Starts a session for a fresh anonymous uid.
    pub fn issue_anonymous(&self) -> Result<(String, Session), JwtError> {
        self.issue(Claims {
            sub: Uuid::new_v4().to_string(),
            email: None,
            name: None,
            picture: None,
            anonymous: true,
            jti: String::new(),
            exp: 0,
            iat: 0,
        })
    }

    fn issue(&self, mut claims: Claims) -> Result<(String, Session), JwtError> {
        let now = Utc::now();
        let expiration = now + Duration::hours(24);
        claims.jti = Uuid::new_v4().to_string();
        claims.iat = now.timestamp() as usize;
        claims.exp = expiration.timestamp() as usize;

        let header = Header::new(Algorithm::HS256);
        let token = encode(&header, &claims, &self.encoding_key).map_err(JwtError::Encoding)?;
        Ok((token, Session::from(claims)))
    }

    pub fn verify_token(&self, token: &str) -> Result<Session, JwtError> {
        if token.is_empty() || token.split('.').count() != 3 {
            return Err(JwtError::InvalidToken);
        }

        let validation = Validation::new(Algorithm::HS256);

        let claims = match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(token_data) => token_data.claims,
            Err(err) => {
                log::debug!("JWT token decode error: {:?}", err);
                return Err(match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidToken
                    | jsonwebtoken::errors::ErrorKind::InvalidSignature => JwtError::InvalidToken,
                    _ => JwtError::Decoding(err.to_string()),
                });
            }
        };

        if self.is_revoked(&claims.jti) {
            log::warn!("Rejected revoked token for {}", claims.sub);
            return Err(JwtError::TokenRevoked);
        }
        Ok(Session::from(claims))
    }

    pub fn revoke(&self, session: &Session) {
        let now = Utc::now().timestamp() as usize;
        if let Ok(mut revoked) = self.revoked.lock() {
            revoked.retain(|_, exp| *exp >= now);
            revoked.insert(session.token_id.clone(), session.expires_at);
        }
    }

    fn is_revoked(&self, jti: &str) -> bool {
        self.revoked
            .lock()
            .map(|revoked| revoked.contains_key(jti))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ProviderIdentity {
        ProviderIdentity {
            uid: "cognito-sub-1".into(),
            email: Some("ada@example.com".into()),
            display_name: Some("Ada".into()),
            photo_url: None,
        }
    }

    #[test]
    fn member_token_verifies() {
        let jwt = JwtService::new("secret");
        let (token, issued) = jwt.issue_member(&identity()).unwrap();

        let session = jwt.verify_token(&token).unwrap();
        assert_eq!(session, issued);
        assert_eq!(session.uid, "cognito-sub-1");
        assert!(!session.is_anonymous);
    }

    #[test]
    fn anonymous_tokens_get_distinct_uids() {
        let jwt = JwtService::new("secret");
        let (token_a, a) = jwt.issue_anonymous().unwrap();
        let (_, b) = jwt.issue_anonymous().unwrap();

        assert_ne!(a.uid, b.uid);
        assert!(jwt.verify_token(&token_a).unwrap().is_anonymous);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let (token, _) = JwtService::new("one").issue_anonymous().unwrap();
        assert!(matches!(
            JwtService::new("two").verify_token(&token),
            Err(JwtError::InvalidToken)
        ));
        assert!(matches!(
            JwtService::new("two").verify_token("garbage"),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn revoked_token_is_rejected() {
        let jwt = JwtService::new("secret");
        let (token, session) = jwt.issue_member(&identity()).unwrap();
        jwt.revoke(&session);

        assert!(matches!(jwt.verify_token(&token), Err(JwtError::TokenRevoked)));

        let (fresh, _) = jwt.issue_member(&identity()).unwrap();
        assert!(jwt.verify_token(&fresh).is_ok());
    }
}
