pub mod batch;
pub mod template;
pub mod transport;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

pub use template::{placeholders, render, RenderedEmail, TemplateError};
pub use transport::{
    transport_from_config, EmailTransport, HttpEmailTransport, LogTransport, OutgoingEmail, SentEmail,
};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email transport not configured: {0}")]
    NotConfigured(String),

    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

static EMAIL_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

/// Syntax check only; deliverability is the provider's problem
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_SHAPE.is_match(email.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(is_valid_email("trapper@forgottenfelines.org"));
        assert!(is_valid_email("  a.b+tnr@x.co "));
        assert!(!is_valid_email("no-at-sign.org"));
        assert!(!is_valid_email("two words@x.org"));
        assert!(!is_valid_email("user@localhost"));
    }
}
