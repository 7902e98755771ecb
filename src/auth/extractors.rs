use crate::auth::{provider::AuthProvider, token::TokenExtractor};
use crate::error::ListwiseError;
use axum::{extract::FromRequestParts, http::request::Parts};

/// Axum extractor for authenticated users
///
/// The provider is read from request extensions. Requests without a valid
/// bearer token are rejected with 401.
///
/// # Example
///
/// ```rust,ignore
/// async fn subscription(
///     AuthUser(identity): AuthUser<JwtIdentityProvider>,
/// ) -> Result<Json<Entitlement>> {
///     // ...
/// }
/// ```
pub struct AuthUser<P: AuthProvider>(pub P::User);

impl<P, S> FromRequestParts<S> for AuthUser<P>
where
    P: AuthProvider,
    S: Send + Sync,
{
    type Rejection = ListwiseError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let provider = parts
            .extensions
            .get::<P>()
            .ok_or_else(|| ListwiseError::internal("Auth provider not found in request extensions"))?
            .clone();

        let token = TokenExtractor::from_header(parts)?;
        let claims = provider.verify_token(&token).await?;
        let user = provider.load_user(&claims).await?;
        provider.validate_user(&user).await?;

        Ok(AuthUser(user))
    }
}
