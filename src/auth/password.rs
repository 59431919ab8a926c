use tokio::sync::OnceCell;

use super::AuthError;
use crate::config;

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Hash with bcrypt at the configured cost, off the async executor
pub async fn hash_password(password: &str) -> Result<String, AuthError> {
    validate_password(password)?;
    let password = password.to_string();
    let cost = config::config().security.bcrypt_cost;
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Verify against a stored bcrypt hash. A malformed hash counts as a mismatch.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    match verified {
        Ok(ok) => Ok(ok),
        Err(e) => {
            tracing::warn!("Stored password hash could not be verified: {}", e);
            Ok(false)
        }
    }
}

static DUMMY_HASH: OnceCell<String> = OnceCell::const_new();

async fn dummy_hash() -> Result<String, AuthError> {
    let cost = config::config().security.bcrypt_cost;
    let filler = uuid::Uuid::new_v4().simple().to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(filler, cost))
        .await
        .map_err(|e| AuthError::Hashing(e.to_string()))?
        .map_err(|e| AuthError::Hashing(e.to_string()))
}

/// Burn one bcrypt verification at the configured cost, for logins that
/// never reach a stored hash. Always a mismatch.
pub async fn verify_dummy(password: &str) -> Result<bool, AuthError> {
    let hash = DUMMY_HASH.get_or_try_init(dummy_hash).await?;
    verify_password(password, hash).await?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_passwords_are_rejected() {
        assert!(matches!(validate_password("cat"), Err(AuthError::WeakPassword(_))));
        assert!(validate_password("ear-tipped").is_ok());
    }

    #[tokio::test]
    async fn hash_then_verify() {
        let hash = tokio::task::spawn_blocking(|| bcrypt::hash("feral-colony", 4).unwrap())
            .await
            .unwrap();
        assert!(verify_password("feral-colony", &hash).await.unwrap());
        assert!(!verify_password("feral-colonies", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn garbage_hash_is_a_mismatch() {
        assert!(!verify_password("whatever1", "not-a-bcrypt-hash").await.unwrap());
    }

    #[tokio::test]
    async fn dummy_verification_runs_a_real_hash_and_never_matches() {
        assert!(!verify_dummy("feral-colony").await.unwrap());
        let hash = DUMMY_HASH.get().unwrap();
        assert!(hash.starts_with("$2"));
        assert!(!verify_dummy("").await.unwrap());
    }
}
