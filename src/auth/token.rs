use crate::error::ListwiseError;
use axum::http::request::Parts;

/// Extracts bearer token from request headers
pub struct TokenExtractor;

impl TokenExtractor {
    /// Extract token from the `Authorization: Bearer <token>` header
    pub fn from_header(parts: &Parts) -> Result<String, ListwiseError> {
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ListwiseError::unauthorized("Missing authorization header"))?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            ListwiseError::unauthorized("Invalid authorization header format. Expected: Bearer <token>")
        })?;

        let token = token.trim();
        if token.is_empty() {
            return Err(ListwiseError::unauthorized("Empty bearer token"));
        }

        Ok(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = Request::builder();
        if let Some(value) = header {
            builder = builder.header("authorization", value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_extract_from_valid_bearer_header() {
        let token = TokenExtractor::from_header(&parts(Some("Bearer test_token_123"))).unwrap();
        assert_eq!(token, "test_token_123");
    }

    #[test]
    fn test_extract_from_missing_header() {
        assert!(TokenExtractor::from_header(&parts(None)).is_err());
    }

    #[test]
    fn test_extract_from_invalid_format() {
        assert!(TokenExtractor::from_header(&parts(Some("Basic credentials"))).is_err());
        assert!(TokenExtractor::from_header(&parts(Some("Bearer  "))).is_err());
    }
}
