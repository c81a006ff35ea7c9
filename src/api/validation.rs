use crate::api::errors::ApiError;
use crate::db::models::QuestionOption;
use crate::db::types::QuestionType;
use crate::schemas::exam::QuestionCreate;
use crate::services::answers::decode_selection;

/// Structural validation for authored questions: MCQs need at least two
/// options, every expected value must be an option value, and
/// `allow_multiple` is MCQ-only with single-select keeping one expected
/// value.
pub(crate) fn validate_question_payload(payload: &QuestionCreate) -> Result<(), ApiError> {
    if payload.allow_multiple && payload.question_type != QuestionType::MultipleChoice {
        return Err(ApiError::BadRequest(
            "allow_multiple can only be set for multiple_choice questions".to_string(),
        ));
    }

    if payload.question_type != QuestionType::MultipleChoice {
        if !payload.options.is_empty() {
            return Err(ApiError::BadRequest(
                "options are only allowed on multiple_choice questions".to_string(),
            ));
        }
        return Ok(());
    }

    if payload.options.len() < 2 {
        return Err(ApiError::BadRequest(
            "Multiple choice questions must have at least 2 options".to_string(),
        ));
    }

    for option in &payload.options {
        if option.label.trim().is_empty() || option.value.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "Every option needs a non-empty label and value".to_string(),
            ));
        }
    }

    let option_values: Vec<&str> =
        payload.options.iter().map(|option| option.value.as_str()).collect();

    let expected = expected_values(payload);
    if expected.is_empty() {
        return Err(ApiError::BadRequest("expected_answer is required".to_string()));
    }

    for value in &expected {
        if !option_values.contains(&value.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "Expected answer \"{value}\" must be one of the option values: {}",
                option_values.join(", ")
            )));
        }
    }

    if !payload.allow_multiple && expected.len() > 1 {
        return Err(ApiError::BadRequest(
            "Single-select questions must have exactly one expected answer".to_string(),
        ));
    }

    Ok(())
}

fn expected_values(payload: &QuestionCreate) -> Vec<String> {
    if payload.allow_multiple {
        decode_selection(&payload.expected_answer)
    } else {
        vec![payload.expected_answer.clone()]
    }
}
