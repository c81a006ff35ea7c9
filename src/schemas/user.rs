use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::models::User;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct UserCreate {
    #[validate(email(message = "A valid email address is required"))]
    pub(crate) email: String,
    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub(crate) password: String,
    #[serde(default)]
    pub(crate) full_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserLogin {
    pub(crate) email: String,
    pub(crate) password: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserResponse {
    pub(crate) id: String,
    pub(crate) email: String,
    pub(crate) full_name: String,
    pub(crate) is_student: bool,
}

impl UserResponse {
    pub(crate) fn from_db(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            is_student: user.is_student,
        }
    }
}
