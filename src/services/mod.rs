pub(crate) mod answers;
pub(crate) mod events;
pub(crate) mod grading;
pub(crate) mod session_tokens;
pub(crate) mod sessions;
