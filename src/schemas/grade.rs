use serde::Serialize;

use crate::core::time::format_primitive;
use crate::db::models::{GradeHistory, GradedAnswer};
use crate::db::types::{GradeStatus, GradingMethod};

#[derive(Debug, Serialize)]
pub(crate) struct GradeHistoryResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) session_id: String,
    pub(crate) status: GradeStatus,
    pub(crate) total_score: f64,
    pub(crate) max_score: f64,
    pub(crate) percentage: f64,
    pub(crate) grading_method: GradingMethod,
    pub(crate) started_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) graded_at: Option<String>,
    pub(crate) created_at: String,
}

impl GradeHistoryResponse {
    pub(crate) fn from_db(grade: &GradeHistory) -> Self {
        Self {
            id: grade.id.clone(),
            exam_id: grade.exam_id.clone(),
            session_id: grade.session_id.clone(),
            status: grade.status,
            total_score: grade.total_score,
            max_score: grade.max_score,
            percentage: grade.percentage,
            grading_method: grade.grading_method,
            started_at: format_primitive(grade.started_at),
            submitted_at: grade.submitted_at.map(format_primitive),
            graded_at: grade.graded_at.map(format_primitive),
            created_at: format_primitive(grade.created_at),
        }
    }
}

/// Detail view: the summary plus the per-answer snapshot taken at grading
/// time.
#[derive(Debug, Serialize)]
pub(crate) struct GradeDetailResponse {
    #[serde(flatten)]
    pub(crate) summary: GradeHistoryResponse,
    pub(crate) answers: Vec<GradedAnswer>,
}

impl GradeDetailResponse {
    pub(crate) fn from_db(grade: GradeHistory) -> Self {
        let summary = GradeHistoryResponse::from_db(&grade);
        Self { summary, answers: grade.answers_data.0 }
    }
}
