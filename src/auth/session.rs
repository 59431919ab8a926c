use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use super::{password, AuthError, AuthStaff};
use crate::config;
use crate::database::models::{staff::STAFF_COLUMNS, Staff, StaffSession};
use crate::database::DatabaseError;

/// Opaque bearer token. Only its SHA-256 digest is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// 64 hex characters from two random v4 UUIDs
    pub fn generate() -> Self {
        Self(format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(self.0.as_bytes()))
    }
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub token: SessionToken,
    pub expires_at: DateTime<Utc>,
    pub staff: Staff,
}

pub async fn login(
    pool: &PgPool,
    email: &str,
    password: &str,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<LoginOutcome, AuthError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }

    let sql = format!("SELECT {} FROM ops.staff s WHERE lower(s.email) = lower($1)", STAFF_COLUMNS);
    let staff = sqlx::query_as::<_, Staff>(&sql)
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(DatabaseError::from)?;

    // Unknown and inactive accounts pay the same bcrypt cost as a wrong password
    let Some(staff) = staff else {
        password::verify_dummy(password).await?;
        tracing::info!("Login rejected: unknown email");
        return Err(AuthError::InvalidCredentials);
    };
    if !staff.is_active {
        password::verify_dummy(password).await?;
        tracing::info!(staff_id = %staff.id, "Login rejected: inactive staff");
        return Err(AuthError::InvalidCredentials);
    }
    if !password::verify_password(password, &staff.password_hash).await? {
        tracing::info!(staff_id = %staff.id, "Login rejected: bad password");
        return Err(AuthError::InvalidCredentials);
    }

    let token = SessionToken::generate();
    let expires_at = Utc::now() + Duration::hours(config::config().security.session_ttl_hours);

    sqlx::query(
        "INSERT INTO ops.staff_sessions (staff_id, token_hash, ip_address, user_agent, expires_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(staff.id)
    .bind(token.digest())
    .bind(ip)
    .bind(user_agent)
    .bind(expires_at)
    .execute(pool)
    .await
    .map_err(DatabaseError::from)?;

    sqlx::query("UPDATE ops.staff SET last_login_at = now() WHERE id = $1")
        .bind(staff.id)
        .execute(pool)
        .await
        .map_err(DatabaseError::from)?;

    tracing::info!(staff_id = %staff.id, "Staff logged in");
    Ok(LoginOutcome { token, expires_at, staff })
}

/// Resolve a live session to its staff member and touch `last_seen_at`
pub async fn authenticate(pool: &PgPool, token: &SessionToken) -> Result<AuthStaff, AuthError> {
    let session = sqlx::query_as::<_, StaffSession>(
        "SELECT ss.id AS session_id, ss.expires_at, s.id AS staff_id, s.email, s.display_name, s.role \
         FROM ops.staff_sessions ss JOIN ops.staff s ON s.id = ss.staff_id \
         WHERE ss.token_hash = $1 AND ss.revoked_at IS NULL AND ss.expires_at > now() AND s.is_active",
    )
    .bind(token.digest())
    .fetch_optional(pool)
    .await
    .map_err(DatabaseError::from)?
    .ok_or(AuthError::SessionInvalid)?;

    let role = session.role.parse().map_err(|_| {
        tracing::error!(staff_id = %session.staff_id, role = %session.role, "Staff row has unknown role");
        AuthError::SessionInvalid
    })?;

    sqlx::query("UPDATE ops.staff_sessions SET last_seen_at = now() WHERE id = $1")
        .bind(session.session_id)
        .execute(pool)
        .await
        .map_err(DatabaseError::from)?;

    Ok(AuthStaff {
        staff_id: session.staff_id,
        session_id: session.session_id,
        email: session.email,
        display_name: session.display_name,
        role,
    })
}

/// Revoke the session. Unknown or already revoked tokens are ignored.
pub async fn logout(pool: &PgPool, token: &SessionToken) -> Result<bool, AuthError> {
    let result = sqlx::query(
        "UPDATE ops.staff_sessions SET revoked_at = now() WHERE token_hash = $1 AND revoked_at IS NULL",
    )
    .bind(token.digest())
    .execute(pool)
    .await
    .map_err(DatabaseError::from)?;
    Ok(result.rows_affected() > 0)
}

pub async fn revoke_all_for_staff<'e, E>(executor: E, staff_id: Uuid) -> Result<u64, DatabaseError>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE ops.staff_sessions SET revoked_at = now() WHERE staff_id = $1 AND revoked_at IS NULL",
    )
    .bind(staff_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_64_hex_and_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn digest_is_stable_sha256_hex() {
        let token = SessionToken::from_raw("abc");
        assert_eq!(
            token.digest(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(token.digest(), token.as_str());
    }
}
