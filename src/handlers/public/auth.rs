use axum::{
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth;
use crate::config;
use crate::database::models::Staff;
use crate::error::ApiError;
use crate::handlers::{pool, JsonBody};
use crate::middleware::{extract_token, ApiResponse};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub staff: Staff,
}

/// `Set-Cookie` value for the session. An empty token with max-age 0 clears it.
pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    let security = &config::config().security;
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        security.session_cookie_name, token, max_age_secs
    );
    if security.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

fn with_cookie(mut response: Response, cookie: &str) -> Result<Response, ApiError> {
    let value = HeaderValue::from_str(cookie)
        .map_err(|_| ApiError::internal_server_error("Could not build session cookie"))?;
    response.headers_mut().insert(header::SET_COOKIE, value);
    Ok(response)
}

/// POST /auth/login
pub async fn login(headers: HeaderMap, body: JsonBody<LoginRequest>) -> Result<Response, ApiError> {
    let axum::Json(body) = body?;
    let pool = pool().await?;
    let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok());
    let ip = client_ip(&headers);

    let outcome = auth::login(&pool, &body.email, &body.password, ip.as_deref(), user_agent).await?;
    let max_age = (outcome.expires_at - Utc::now()).num_seconds().max(0);
    let cookie = session_cookie(outcome.token.as_str(), max_age);

    let response = ApiResponse::success(LoginResponse {
        token: outcome.token.as_str().to_string(),
        expires_at: outcome.expires_at,
        staff: outcome.staff,
    })
    .into_response();
    with_cookie(response, &cookie)
}

/// POST /auth/logout - revokes the presented session and clears the cookie
pub async fn logout(headers: HeaderMap) -> Result<Response, ApiError> {
    let cookie_name = &config::config().security.session_cookie_name;
    let revoked = match extract_token(&headers, cookie_name) {
        Some(token) => {
            let pool = pool().await?;
            auth::logout(&pool, &token).await?
        }
        None => false,
    };
    let response = ApiResponse::success(json!({ "logged_out": revoked })).into_response();
    with_cookie(response, &session_cookie("", 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_is_http_only() {
        let cookie = session_cookie("tok", 3600);
        assert!(cookie.starts_with("atlas_session=tok; Path=/; HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
    }

    #[test]
    fn first_forwarded_address_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.7"));
        assert!(client_ip(&HeaderMap::new()).is_none());
    }
}
