use crate::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;

/// Turns a bearer token into an authenticated user.
///
/// # Example
///
/// ```rust,ignore
/// use listwise::auth::{AuthProvider, JwtVerifier};
///
/// #[derive(Clone)]
/// struct MyAuthProvider {
///     verifier: JwtVerifier<MyClaims>,
/// }
///
/// #[async_trait]
/// impl AuthProvider for MyAuthProvider {
///     type Claims = MyClaims;
///     type User = MyUser;
///
///     async fn verify_token(&self, token: &str) -> Result<Self::Claims> {
///         Ok(self.verifier.verify(token)?.claims)
///     }
///
///     async fn load_user(&self, claims: &Self::Claims) -> Result<Self::User> {
///         Ok(MyUser { id: claims.sub.clone() })
///     }
/// }
/// ```
#[async_trait]
pub trait AuthProvider: Send + Sync + Clone + 'static {
    /// The token claims type
    type Claims: DeserializeOwned + Send + Sync;

    /// The authenticated user handed to handlers
    type User: Send + Sync + Clone;

    /// Verify a token and return its claims
    async fn verify_token(&self, token: &str) -> Result<Self::Claims>;

    /// Build the user from verified claims
    async fn load_user(&self, claims: &Self::Claims) -> Result<Self::User>;

    /// Extra checks after the user is loaded
    async fn validate_user(&self, _user: &Self::User) -> Result<()> {
        Ok(())
    }
}
