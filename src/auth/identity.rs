//! Identity tokens issued by the web app's auth backend.

use crate::error::{ListwiseError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::jwt::JwtVerifier;
use super::provider::AuthProvider;

/// Claims carried by an identity token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: u64,
}

/// The caller, as far as billing is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

/// Verifies HS256 identity tokens and yields an [`Identity`].
#[derive(Clone)]
pub struct JwtIdentityProvider {
    verifier: JwtVerifier<IdentityClaims>,
}

impl JwtIdentityProvider {
    #[must_use]
    pub fn new(verifier: JwtVerifier<IdentityClaims>) -> Self {
        Self { verifier }
    }

    /// Build from the auth section of the configuration.
    pub fn from_config(config: &crate::config::AuthConfig) -> Result<Self> {
        use secrecy::ExposeSecret;

        let secret = config
            .jwt_secret
            .as_ref()
            .ok_or_else(|| ListwiseError::internal("JWT secret is not configured"))?;

        let mut verifier = JwtVerifier::from_secret(secret.expose_secret().as_bytes());
        if let Some(issuer) = &config.issuer {
            verifier.set_issuer(issuer.clone());
        }
        if let Some(audience) = &config.audience {
            verifier.set_audience(audience.clone());
        }
        Ok(Self::new(verifier))
    }
}

#[async_trait]
impl AuthProvider for JwtIdentityProvider {
    type Claims = IdentityClaims;
    type User = Identity;

    async fn verify_token(&self, token: &str) -> Result<Self::Claims> {
        Ok(self.verifier.verify(token)?.claims)
    }

    async fn load_user(&self, claims: &Self::Claims) -> Result<Self::User> {
        Ok(Identity {
            user_id: claims.sub.clone(),
            email: claims.email.clone().filter(|e| !e.is_empty()),
        })
    }

    async fn validate_user(&self, user: &Self::User) -> Result<()> {
        if user.user_id.trim().is_empty() {
            return Err(ListwiseError::unauthorized("Token has no subject"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &[u8] = b"identity_secret_for_tests";

    fn token(sub: &str, email: Option<&str>) -> String {
        let claims = IdentityClaims {
            sub: sub.to_string(),
            email: email.map(str::to_string),
            exp: crate::utils::now_unix() + 3600,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET)).unwrap()
    }

    fn provider() -> JwtIdentityProvider {
        JwtIdentityProvider::new(JwtVerifier::from_secret(SECRET))
    }

    #[tokio::test]
    async fn test_identity_from_claims() {
        let provider = provider();
        let claims = provider.verify_token(&token("u1", Some("u1@example.com"))).await.unwrap();
        let identity = provider.load_user(&claims).await.unwrap();
        assert_eq!(
            identity,
            Identity {
                user_id: "u1".to_string(),
                email: Some("u1@example.com".to_string()),
            }
        );
        assert!(provider.validate_user(&identity).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_subject_rejected() {
        let provider = provider();
        let claims = provider.verify_token(&token("", None)).await.unwrap();
        let identity = provider.load_user(&claims).await.unwrap();
        assert!(matches!(
            provider.validate_user(&identity).await,
            Err(ListwiseError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let other = JwtIdentityProvider::new(JwtVerifier::from_secret(b"another_secret"));
        assert!(other.verify_token(&token("u1", None)).await.is_err());
    }
}
