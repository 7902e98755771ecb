use crate::error::{ListwiseError, Result};
use jsonwebtoken::{Algorithm, DecodingKey, TokenData, Validation, decode};
use serde::de::DeserializeOwned;
use std::sync::{Arc, OnceLock};

/// HS256 JWT verifier for any claims type
///
/// Expiry is always validated. Issuer and audience are checked when set.
#[derive(Clone)]
pub struct JwtVerifier<C> {
    decoding_key: DecodingKey,
    validation: Validation,
    issuer_configured: bool,
    audience_configured: bool,
    warning_logged: Arc<OnceLock<()>>,
    _claims: std::marker::PhantomData<C>,
}

impl<C: DeserializeOwned + Clone> JwtVerifier<C> {
    /// Create a verifier using a shared secret
    pub fn from_secret(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer_configured: false,
            audience_configured: false,
            warning_logged: Arc::new(OnceLock::new()),
            _claims: std::marker::PhantomData,
        }
    }

    /// Set the expected issuer claim
    pub fn set_issuer(&mut self, issuer: impl Into<String>) {
        self.validation.set_issuer(&[issuer.into()]);
        self.issuer_configured = true;
    }

    /// Set the expected audience claim
    pub fn set_audience(&mut self, audience: impl Into<String>) {
        self.validation.set_audience(&[audience.into()]);
        self.validation.validate_aud = true;
        self.audience_configured = true;
    }

    /// Verify and decode a token
    pub fn verify(&self, token: &str) -> Result<TokenData<C>> {
        if !self.issuer_configured || !self.audience_configured {
            self.warning_logged.get_or_init(|| {
                tracing::warn!(
                    issuer = self.issuer_configured,
                    audience = self.audience_configured,
                    "JWT verifier is missing issuer or audience validation"
                );
            });
        }

        decode::<C>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ListwiseError::unauthorized(format!("Invalid token: {}", e)))
    }
}
