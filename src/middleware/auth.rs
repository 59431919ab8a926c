use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::{self, AuthError, AuthStaff, SessionToken};
use crate::config;
use crate::database::DatabaseManager;
use crate::error::ApiError;
use crate::types::StaffRole;

/// Session middleware for `/api/*`: resolves the token and injects `AuthStaff`
pub async fn session_auth_middleware(headers: HeaderMap, mut request: Request, next: Next) -> Response {
    let cookie_name = &config::config().security.session_cookie_name;
    let Some(token) = extract_token(&headers, cookie_name) else {
        return ApiError::from(AuthError::MissingToken).into_response();
    };

    let pool = match DatabaseManager::pool().await {
        Ok(pool) => pool,
        Err(e) => return ApiError::from(e).into_response(),
    };

    match auth::authenticate(&pool, &token).await {
        Ok(staff) => {
            tracing::debug!(staff_id = %staff.staff_id, role = %staff.role, "Authenticated request");
            request.extensions_mut().insert(staff);
            next.run(request).await
        }
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Layered inside `session_auth_middleware` on `/api/admin/*`
pub async fn require_admin(request: Request, next: Next) -> Response {
    let Some(staff) = request.extensions().get::<AuthStaff>() else {
        return ApiError::from(AuthError::MissingToken).into_response();
    };
    if let Err(e) = staff.require_role(StaffRole::Admin) {
        tracing::info!(staff_id = %staff.staff_id, role = %staff.role, "Admin route refused");
        return ApiError::from(e).into_response();
    }
    next.run(request).await
}

/// Bearer header first, then the session cookie
pub fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<SessionToken> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(SessionToken::from_raw(token));
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| SessionToken::from_raw(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        headers.insert(header::COOKIE, HeaderValue::from_static("atlas_session=fromcookie"));
        assert_eq!(extract_token(&headers, "atlas_session").unwrap().as_str(), "abc123");
    }

    #[test]
    fn falls_back_to_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; atlas_session=tok42"));
        assert_eq!(extract_token(&headers, "atlas_session").unwrap().as_str(), "tok42");
    }

    #[test]
    fn ignores_empty_and_non_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9vOmJhcg=="));
        headers.insert(header::COOKIE, HeaderValue::from_static("atlas_session="));
        assert!(extract_token(&headers, "atlas_session").is_none());
    }
}
