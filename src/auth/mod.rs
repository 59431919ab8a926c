pub mod password;
pub mod session;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::types::StaffRole;

pub use password::{hash_password, validate_password, verify_password, MIN_PASSWORD_LENGTH};
pub use session::{authenticate, login, logout, revoke_all_for_staff, LoginOutcome, SessionToken};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("session invalid or expired")]
    SessionInvalid,

    #[error("missing session token")]
    MissingToken,

    #[error("requires {required} role")]
    InsufficientRole { required: StaffRole },

    #[error("{0}")]
    WeakPassword(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Staff member attached to an authenticated request
#[derive(Debug, Clone, Serialize)]
pub struct AuthStaff {
    pub staff_id: Uuid,
    pub session_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: StaffRole,
}

impl AuthStaff {
    pub fn require_role(&self, minimum: StaffRole) -> Result<(), AuthError> {
        require_role(self, minimum)
    }
}

pub fn require_role(staff: &AuthStaff, minimum: StaffRole) -> Result<(), AuthError> {
    if staff.role.at_least(minimum) {
        Ok(())
    } else {
        Err(AuthError::InsufficientRole { required: minimum })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staff(role: StaffRole) -> AuthStaff {
        AuthStaff {
            staff_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            email: "trapper@example.org".into(),
            display_name: "Trapper".into(),
            role,
        }
    }

    #[test]
    fn volunteer_cannot_reach_admin() {
        let err = staff(StaffRole::Volunteer).require_role(StaffRole::Admin).unwrap_err();
        assert!(matches!(err, AuthError::InsufficientRole { required: StaffRole::Admin }));
    }

    #[test]
    fn admin_passes_every_gate() {
        let admin = staff(StaffRole::Admin);
        for role in [StaffRole::Volunteer, StaffRole::Staff, StaffRole::Admin] {
            assert!(admin.require_role(role).is_ok());
        }
    }
}
