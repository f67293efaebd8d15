//! Authenticated caller as seen by the booking engine.

use serde::Serialize;
use shared::jwt::Role;
use uuid::Uuid;

/// A verified identity supplied by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Instructors and admins publish lessons.
    pub fn can_publish_lessons(&self) -> bool {
        matches!(self.role, Role::Instructor | Role::Admin)
    }
}
