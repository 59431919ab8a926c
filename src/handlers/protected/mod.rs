// handlers/protected/mod.rs - staff session required (/api/*)
//
// `session_auth_middleware` puts an `AuthStaff` in the request extensions
// before any handler here runs.
pub mod auth;
pub mod cats;
pub mod email;
pub mod history;
pub mod intake;
pub mod map;
pub mod matching;
pub mod people;
pub mod places;
pub mod requests;

use serde::Deserialize;
use uuid::Uuid;

/// Body of `POST /:id/merge`
#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub into: Uuid,
    pub reason: Option<String>,
}
