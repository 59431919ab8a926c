pub mod auth;
pub mod response;

pub use auth::{extract_token, require_admin, session_auth_middleware};
pub use response::{ApiResponse, ApiResult};
