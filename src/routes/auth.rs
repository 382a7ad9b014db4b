use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, state::SharedState};

/// Header carrying the shared API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests whose `x-api-key` header does not match the configured key.
pub async fn require_api_key(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());
    check_api_key(state.config().api_key.as_deref(), provided)?;
    Ok(next.run(req).await)
}

/// No configured key disables the check (debug mode only).
pub fn check_api_key(expected: Option<&str>, provided: Option<&str>) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };

    match provided {
        None => Err(AppError::Unauthorized(format!(
            "missing API key header `{API_KEY_HEADER}`"
        ))),
        Some(key) if key == expected => Ok(()),
        Some(_) => Err(AppError::Forbidden("invalid API key".into())),
    }
}
