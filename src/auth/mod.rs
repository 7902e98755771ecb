//! Caller identity for the billing API.

pub mod extractors;
pub mod identity;
pub mod jwt;
pub mod provider;
pub mod token;

pub use extractors::AuthUser;
pub use identity::{Identity, IdentityClaims, JwtIdentityProvider};
pub use jwt::JwtVerifier;
pub use provider::AuthProvider;
pub use token::TokenExtractor;
