//! HTTP basic authentication for the admin routes.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::config::AdminCredentials;
use crate::error::AppError;
use crate::server::AppState;

/// Rejects the request with 401 unless it carries the configured admin
/// credentials. With no credentials configured every request is rejected.
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    match check(state.config.admin.as_ref(), &req) {
        Ok(()) => next.run(req).await,
        Err(err) => err.into_response(),
    }
}

fn check(expected: Option<&AdminCredentials>, req: &Request) -> Result<(), AppError> {
    let Some(expected) = expected else {
        warn!(
            path = %req.uri().path(),
            "admin route requested but admin credentials are not configured"
        );
        return Err(AppError::Unauthorized);
    };
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    let (user, password) = parse_basic(header).ok_or(AppError::Unauthorized)?;
    if matches(&user, &expected.user) & matches(&password, &expected.password) {
        Ok(())
    } else {
        warn!(path = %req.uri().path(), "admin authentication failed");
        Err(AppError::Unauthorized)
    }
}

/// Decodes `Basic <base64(user:password)>`.
fn parse_basic(header: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

// Digests have a fixed length, so comparing them does not leak the secret's length.
fn matches(given: &str, expected: &str) -> bool {
    let a = Sha256::digest(given.as_bytes());
    let b = Sha256::digest(expected.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn creds() -> AdminCredentials {
        AdminCredentials {
            user: "admin".to_string(),
            password: "s3cret".to_string(),
        }
    }

    fn request(auth: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/admin/stats");
        if let Some(a) = auth {
            builder = builder.header(AUTHORIZATION, a);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn basic(user: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
    }

    #[test]
    fn accepts_matching_credentials() {
        let req = request(Some(&basic("admin", "s3cret")));
        assert!(check(Some(&creds()), &req).is_ok());
    }

    #[test]
    fn rejects_missing_or_wrong_credentials() {
        let c = creds();
        assert!(check(Some(&c), &request(None)).is_err());
        assert!(check(Some(&c), &request(Some(&basic("admin", "wrong")))).is_err());
        assert!(check(Some(&c), &request(Some("Bearer abc"))).is_err());
        assert!(check(Some(&c), &request(Some("Basic !!!not-base64"))).is_err());
    }

    #[test]
    fn unconfigured_admin_rejects_everything() {
        assert!(check(None, &request(Some(&basic("admin", "s3cret")))).is_err());
    }

    #[test]
    fn password_may_contain_colons() {
        assert_eq!(
            parse_basic(&basic("ops", "a:b:c")),
            Some(("ops".to_string(), "a:b:c".to_string()))
        );
    }
}
