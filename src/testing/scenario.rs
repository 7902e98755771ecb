//! In-process request builder with chained assertions.

use axum::{
    Router,
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, header},
    response::Response,
};
use serde::{Serialize, de::DeserializeOwned};
use tower::ServiceExt;

/// One request against a router.
pub struct Scenario {
    app: Router,
    method: Method,
    uri: String,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Body,
}

impl Scenario {
    pub fn new(app: Router, method: Method, uri: &str) -> Self {
        Self {
            app,
            method,
            uri: uri.to_string(),
            headers: Vec::new(),
            body: Body::empty(),
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((
            HeaderName::from_bytes(key.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        ));
        self
    }

    /// `Authorization: Bearer <token>`
    pub fn bearer_token(self, token: &str) -> Self {
        self.header(header::AUTHORIZATION.as_str(), &format!("Bearer {}", token))
    }

    /// Append URL-encoded query parameters.
    pub fn with_query(mut self, params: &[(&str, &str)]) -> Self {
        let encoded: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        if !encoded.is_empty() {
            let separator = if self.uri.contains('?') { '&' } else { '?' };
            self.uri = format!("{}{}{}", self.uri, separator, encoded.join("&"));
        }
        self
    }

    pub fn json_body<T: Serialize>(mut self, body: &T) -> Self {
        self.body = Body::from(serde_json::to_vec(body).unwrap());
        self.header(header::CONTENT_TYPE.as_str(), "application/json")
    }

    /// Body sent byte for byte, with no content type.
    pub fn raw_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::from(body.into());
        self
    }

    pub async fn execute(self) -> ScenarioAssert {
        let mut request = Request::builder()
            .method(self.method)
            .uri(self.uri)
            .body(self.body)
            .unwrap();
        request.headers_mut().extend(self.headers);

        let response = self.app.oneshot(request).await.unwrap();
        ScenarioAssert { response }
    }
}

/// Response under test.
pub struct ScenarioAssert {
    response: Response,
}

impl ScenarioAssert {
    pub fn assert_status(self, expected: StatusCode) -> Self {
        assert_eq!(
            self.response.status(),
            expected,
            "Expected status {}, got {}",
            expected,
            self.response.status()
        );
        self
    }

    pub fn assert_ok(self) -> Self {
        self.assert_status(StatusCode::OK)
    }

    pub fn assert_bad_request(self) -> Self {
        self.assert_status(StatusCode::BAD_REQUEST)
    }

    pub fn assert_unauthorized(self) -> Self {
        self.assert_status(StatusCode::UNAUTHORIZED)
    }

    pub fn assert_forbidden(self) -> Self {
        self.assert_status(StatusCode::FORBIDDEN)
    }

    pub fn assert_server_error(self) -> Self {
        self.assert_status(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.response.headers().get(key).and_then(|v| v.to_str().ok())
    }

    pub async fn body_string(self) -> String {
        let bytes = axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    pub async fn json<T: DeserializeOwned>(self) -> T {
        let body = self.body_string().await;
        serde_json::from_str(&body)
            .unwrap_or_else(|e| panic!("Failed to parse JSON response ({}): {}", e, body))
    }
}

pub fn get(app: Router, uri: &str) -> Scenario {
    Scenario::new(app, Method::GET, uri)
}

pub fn post(app: Router, uri: &str) -> Scenario {
    Scenario::new(app, Method::POST, uri)
}
