use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, msg};
use crate::models::Profile;
use crate::util::extract_bearer_token;

/// The authenticated caller, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub profile: Profile,
}

/// Resolve the bearer key to a profile.
fn authenticate_api_key(state: &AppState, headers: &HeaderMap) -> Result<Profile, AppError> {
    let token = extract_bearer_token(headers).ok_or(AppError::Unauthorized)?;
    let conn = state.db.get()?;

    queries::get_profile_by_api_key(&conn, token)?.ok_or(AppError::Unauthorized)
}

/// Any authenticated user.
pub async fn require_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let profile = authenticate_api_key(&state, request.headers())?;

    request.extensions_mut().insert(AuthContext { profile });
    Ok(next.run(request).await)
}

/// Authenticated user with the admin role. Non-admins get 403 before the handler runs.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let profile = authenticate_api_key(&state, request.headers())?;

    if !profile.is_admin() {
        tracing::warn!(
            profile_id = %profile.id,
            path = %request.uri().path(),
            "Non-admin attempted an admin action"
        );
        return Err(AppError::Forbidden(msg::ADMIN_ROLE_REQUIRED.into()));
    }

    request.extensions_mut().insert(AuthContext { profile });
    Ok(next.run(request).await)
}
