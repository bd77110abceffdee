//! Bearer-token authentication for the HTTP API.
//!
//! Tokens are HS256 JWTs signed with the shared `JWT_SECRET`. `exp` and `nbf`
//! are enforced when present, with no leeway. A handful of public paths skip
//! the check entirely.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Paths reachable without a token.
pub const PUBLIC_PATHS: &[&str] = &["/api/login", "/api/health"];

/// Verified token claims, attached to the request for downstream handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims(pub Map<String, Value>);

impl Claims {
    /// The `sub` claim, if it is a string.
    pub fn subject(&self) -> Option<&str> {
        self.0.get("sub").and_then(Value::as_str)
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header.
    CredentialsRequired,
    /// Header present but not a usable bearer token, or the token failed verification.
    InvalidToken(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::CredentialsRequired => "credentials_required",
            Self::InvalidToken(_) => "invalid_token",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::CredentialsRequired => "No authorization token was found",
            Self::InvalidToken(reason) => reason,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse<'a> {
            error: ErrorDetail<'a>,
        }
        #[derive(Serialize)]
        struct ErrorDetail<'a> {
            code: &'static str,
            message: &'a str,
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.message(),
            },
        };
        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":{"code":"invalid_token","message":"Authentication failed"}}"#.to_string()
        });

        (
            StatusCode::UNAUTHORIZED,
            [(header::CONTENT_TYPE, "application/json")],
            json,
        )
            .into_response()
    }
}

/// HS256 token verifier.
#[derive(Clone)]
pub struct JwtAuth {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuth")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl JwtAuth {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Verify a raw token and return its claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map(|data| Claims(data.claims))
            .map_err(|e| AuthError::InvalidToken(describe(e.kind()).to_string()))
    }

    /// Verify the `Authorization` header value of a request.
    pub fn authenticate(&self, request: &Request<Body>) -> Result<Claims, AuthError> {
        let token = extract_bearer_token(request)?.ok_or(AuthError::CredentialsRequired)?;
        self.verify(token)
    }
}

fn describe(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ExpiredSignature => "jwt expired",
        ErrorKind::ImmatureSignature => "jwt not active",
        ErrorKind::InvalidSignature => "invalid signature",
        ErrorKind::InvalidAlgorithm => "invalid algorithm",
        _ => "jwt malformed",
    }
}

fn extract_bearer_token(request: &Request<Body>) -> Result<Option<&str>, AuthError> {
    let Some(auth_header) = request.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let auth_str = auth_header.to_str().map_err(|_| {
        AuthError::InvalidToken("Authorization header contains invalid characters".to_string())
    })?;

    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(AuthError::InvalidToken(
            "Format is Authorization: Bearer [token]".to_string(),
        ));
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidToken("Bearer token is empty".to_string()));
    }

    Ok(Some(token))
}

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

/// Reject requests without a valid token, except on [`PUBLIC_PATHS`].
pub async fn jwt_middleware(
    State(auth): State<Arc<JwtAuth>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_public_path(request.uri().path()) {
        return next.run(request).await;
    }

    match auth.authenticate(&request) {
        Ok(claims) => {
            debug!(sub = ?claims.subject(), "Token accepted");
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            warn!(
                path = %request.uri().path(),
                code = e.code(),
                reason = e.message(),
                "Authentication failed"
            );
            e.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &str = "test-secret";

    fn token(claims: Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn request_with(auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/api/camiones");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_valid_token_without_exp() {
        let auth = JwtAuth::new(SECRET);
        let claims = auth.verify(&token(json!({"sub": "ana"}), SECRET)).unwrap();
        assert_eq!(claims.subject(), Some("ana"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = JwtAuth::new(SECRET);
        let err = auth
            .verify(&token(json!({"sub": "ana"}), "other"))
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidToken("invalid signature".to_string()));
    }

    #[test]
    fn test_expired_token_rejected_without_leeway() {
        let auth = JwtAuth::new(SECRET);
        let err = auth
            .verify(&token(json!({"sub": "ana", "exp": now() - 5}), SECRET))
            .unwrap_err();
        assert_eq!(err.message(), "jwt expired");
        assert_eq!(err.code(), "invalid_token");
    }

    #[test]
    fn test_not_yet_valid_token_rejected() {
        let auth = JwtAuth::new(SECRET);
        let err = auth
            .verify(&token(json!({"nbf": now() + 600}), SECRET))
            .unwrap_err();
        assert_eq!(err.message(), "jwt not active");
    }

    #[test]
    fn test_garbage_token_is_malformed() {
        let auth = JwtAuth::new(SECRET);
        let err = auth.verify("not-a-jwt").unwrap_err();
        assert_eq!(err.message(), "jwt malformed");
    }

    #[test]
    fn test_missing_header_requires_credentials() {
        let auth = JwtAuth::new(SECRET);
        let err = auth.authenticate(&request_with(None)).unwrap_err();
        assert_eq!(err, AuthError::CredentialsRequired);
        assert_eq!(err.code(), "credentials_required");
    }

    #[test]
    fn test_wrong_scheme_is_invalid() {
        let auth = JwtAuth::new(SECRET);
        let err = auth
            .authenticate(&request_with(Some("Basic dXNlcjpwYXNz")))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_token");
    }

    #[test]
    fn test_bearer_header_accepted() {
        let auth = JwtAuth::new(SECRET);
        let value = format!("Bearer {}", token(json!({"sub": "ana"}), SECRET));
        assert!(auth.authenticate(&request_with(Some(&value))).is_ok());
    }

    #[test]
    fn test_public_paths() {
        assert!(is_public_path("/api/health"));
        assert!(is_public_path("/api/login"));
        assert!(!is_public_path("/api/health/deep"));
        assert!(!is_public_path("/api/camiones"));
    }

    #[tokio::test]
    async fn test_rejection_body_is_json() {
        let response = AuthError::CredentialsRequired.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "credentials_required");
    }
}
