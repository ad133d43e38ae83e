//! Session resolution. The identity is carried as an explicit value through
//! every operation that needs one, never read from ambient state.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use uuid::Uuid;

use crate::models::ApiError;
use crate::supabase::SupabaseAuth;

/// The authenticated caller for one request.
#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: Uuid,
    pub access_token: String,
}

pub async fn require_session(
    State(auth): State<SupabaseAuth>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(token) = extract_bearer(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_token",
            "Provide an Authorization: Bearer token",
        ));
    };

    let user = match auth.get_user(&token).await {
        Ok(user) => user,
        Err(err) => {
            return Ok(unauthorized_response("invalid_token", err.detail()));
        }
    };

    request.extensions_mut().insert(Session {
        user_id: user.id,
        access_token: token,
    });
    Ok(next.run(request).await)
}

fn extract_bearer(headers: &http::HeaderMap) -> Option<String> {
    let value = headers.get(http::header::AUTHORIZATION)?;
    let raw = value.to_str().ok()?;
    if raw.len() >= 7 && raw[..6].eq_ignore_ascii_case("bearer") {
        let token = raw[6..].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    None
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
        fields: None,
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}
