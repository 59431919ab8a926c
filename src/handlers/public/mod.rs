// handlers/public/mod.rs - no session required
pub mod auth;
pub mod intake;
pub mod root;

pub use auth::{login, logout};
pub use intake::submit_intake;
pub use root::{health, root};
