use std::collections::HashMap;

use serde::Serialize;

pub(crate) mod auth;
pub(crate) mod exam;
pub(crate) mod grade;
pub(crate) mod session;
pub(crate) mod user;

/// Uniform response envelope: every API v1 endpoint answers with
/// `{success, message, data}`.
#[derive(Debug, Serialize)]
pub(crate) struct Envelope<T> {
    pub(crate) success: bool,
    pub(crate) message: String,
    pub(crate) data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub(crate) fn ok(message: impl Into<String>, data: T) -> Self {
        Self { success: true, message: message.into(), data: Some(data) }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) service: String,
    pub(crate) status: String,
    pub(crate) components: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RootResponse {
    pub(crate) message: String,
    pub(crate) version: String,
}
