pub(crate) mod lexical;
pub(crate) mod llm;
pub(crate) mod mcq;

use thiserror::Error;

use crate::core::config::{GradingEngine, Settings};
use crate::db::models::Question;
use crate::db::types::QuestionType;

#[derive(Debug, Error)]
pub(crate) enum GradingError {
    #[error("LLM API key not configured")]
    MissingApiKey,
    #[error("LLM request failed: {0}")]
    Request(String),
    #[error("invalid grading response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradeOutcome {
    pub(crate) score: f64,
    pub(crate) feedback: String,
}

/// Free-text grading strategy, selected by configuration. Multiple-choice
/// questions never reach it.
#[derive(Debug, Clone)]
pub(crate) enum FreeTextGrader {
    Lexical(lexical::LexicalGrader),
    Llm(llm::LlmGrader),
}

impl FreeTextGrader {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self, GradingError> {
        match settings.grading().engine {
            GradingEngine::Lexical => {
                Ok(Self::Lexical(lexical::LexicalGrader::from_settings(settings.grading())))
            }
            GradingEngine::Llm => Ok(Self::Llm(llm::LlmGrader::from_settings(settings)?)),
        }
    }

    pub(crate) async fn grade(
        &self,
        question_text: &str,
        expected_answer: &str,
        answer_text: &str,
        max_points: i32,
    ) -> Result<GradeOutcome, GradingError> {
        match self {
            Self::Lexical(grader) => Ok(grader.grade(answer_text, expected_answer, max_points)),
            Self::Llm(grader) => {
                grader.grade(question_text, expected_answer, answer_text, max_points).await
            }
        }
    }
}

/// Grades one answer: blank answers short-circuit, multiple-choice always
/// takes the structural grader, everything else goes through the
/// configured free-text engine.
pub(crate) async fn grade_answer(
    grader: &FreeTextGrader,
    question: &Question,
    answer_text: &str,
) -> Result<GradeOutcome, GradingError> {
    if answer_text.trim().is_empty() {
        return Ok(GradeOutcome { score: 0.0, feedback: "No answer provided.".to_string() });
    }

    if question.question_type == QuestionType::MultipleChoice {
        return Ok(mcq::grade(
            answer_text,
            &question.expected_answer,
            question.points,
            question.allow_multiple,
        ));
    }

    grader
        .grade(&question.question_text, &question.expected_answer, answer_text, question.points)
        .await
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::QuestionOption;
    use sqlx::types::Json;

    fn question(question_type: QuestionType) -> Question {
        Question {
            id: "q-1".to_string(),
            exam_id: "e-1".to_string(),
            question_text: "What is Python?".to_string(),
            question_type,
            expected_answer: "opt1".to_string(),
            options: Json(vec![
                QuestionOption { label: "A".to_string(), value: "opt1".to_string() },
                QuestionOption { label: "B".to_string(), value: "opt2".to_string() },
            ]),
            allow_multiple: false,
            points: 5,
            order_index: 1,
        }
    }

    fn lexical_grader() -> FreeTextGrader {
        FreeTextGrader::Lexical(lexical::LexicalGrader::new(0.4, 0.6, 0.3))
    }

    #[tokio::test]
    async fn blank_answer_short_circuits() {
        let outcome = grade_answer(&lexical_grader(), &question(QuestionType::ShortAnswer), "   ")
            .await
            .expect("grade");
        assert_eq!(outcome.score, 0.0);
        assert_eq!(outcome.feedback, "No answer provided.");
    }

    #[tokio::test]
    async fn mcq_bypasses_free_text_engine() {
        let outcome = grade_answer(&lexical_grader(), &question(QuestionType::MultipleChoice), "opt1")
            .await
            .expect("grade");
        assert_eq!(outcome.score, 5.0);
        assert_eq!(outcome.feedback, "Correct answer selected.");
    }

    #[test]
    fn round2_behaves() {
        assert_eq!(round2(6.666_666_7), 6.67);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(99.999), 100.0);
    }
}
