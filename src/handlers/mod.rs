// handlers/mod.rs - three security tiers
//
// Public (no session) → Protected (staff session) → Elevated (admin session)
pub mod elevated;
pub mod protected;
pub mod public;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use sqlx::PgPool;

use crate::database::DatabaseManager;
use crate::error::ApiError;

/// JSON body whose rejection renders through `ApiError`
pub type JsonBody<T> = Result<Json<T>, JsonRejection>;

pub(crate) async fn pool() -> Result<PgPool, ApiError> {
    Ok(DatabaseManager::pool().await?)
}
