pub(crate) mod answers;
pub(crate) mod exams;
pub(crate) mod grades;
pub(crate) mod questions;
pub(crate) mod sessions;
pub(crate) mod tokens;
pub(crate) mod users;
