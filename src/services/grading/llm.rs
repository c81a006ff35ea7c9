use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use super::{round2, GradeOutcome, GradingError};
use crate::core::config::Settings;

const SYSTEM_PROMPT: &str = "You are an expert academic grader. \
Evaluate the student's answer against the expected answer and respond with a \
strict JSON object of the form {\"score\": <number>, \"feedback\": \"<string>\"}. \
The score must be between 0 and the maximum points. Respond with JSON only.";

const JSON_SHAPE_REMINDER: &str = "Reminder: respond with a single JSON object \
{\"score\": <number between 0 and the maximum points>, \"feedback\": \"<string>\"} \
and nothing else.";

/// Chat-completion grader in JSON mode. Malformed replies are retried with
/// an appended shape reminder before the answer is given up on.
#[derive(Debug, Clone)]
pub(crate) struct LlmGrader {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    max_retries: u32,
}

impl LlmGrader {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self, GradingError> {
        let llm = settings.llm();
        if llm.api_key.is_empty() {
            return Err(GradingError::MissingApiKey);
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(llm.request_timeout))
            .build()
            .map_err(|err| GradingError::Request(err.to_string()))?;

        Ok(Self {
            client,
            api_key: llm.api_key.clone(),
            base_url: llm.base_url.trim_end_matches('/').to_string(),
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            max_retries: llm.max_retries,
        })
    }

    pub(crate) async fn grade(
        &self,
        question_text: &str,
        expected_answer: &str,
        answer_text: &str,
        max_points: i32,
    ) -> Result<GradeOutcome, GradingError> {
        let base_prompt = build_user_prompt(question_text, expected_answer, answer_text, max_points);
        let url = format!("{}/chat/completions", self.base_url);

        let mut last_error =
            GradingError::InvalidResponse("no attempts were made".to_string());

        for attempt in 0..self.max_retries {
            let user_prompt = if attempt == 0 {
                base_prompt.clone()
            } else {
                format!("{base_prompt}\n\n{JSON_SHAPE_REMINDER}")
            };

            let payload = json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": user_prompt}
                ],
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
                "response_format": {"type": "json_object"}
            });

            let content = match self.request_completion(&url, &payload).await {
                Ok(content) => content,
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "LLM grading request failed");
                    last_error = err;
                    if attempt + 1 < self.max_retries {
                        tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt))).await;
                    }
                    continue;
                }
            };

            match parse_grade_payload(&content, max_points) {
                Ok(outcome) => return Ok(outcome),
                Err(reason) => {
                    tracing::warn!(attempt, reason = %reason, "LLM grading response rejected");
                    last_error = GradingError::InvalidResponse(reason);
                }
            }
        }

        Err(last_error)
    }

    async fn request_completion(&self, url: &str, payload: &Value) -> Result<String, GradingError> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|err| GradingError::Request(err.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|err| GradingError::Request(err.to_string()))?;

        if !status.is_success() {
            return Err(GradingError::Request(format!("chat completion returned {status}: {body}")));
        }

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|value| value.as_str())
            .map(|content| content.to_string())
            .ok_or_else(|| GradingError::InvalidResponse("missing response content".to_string()))
    }
}

fn build_user_prompt(
    question_text: &str,
    expected_answer: &str,
    answer_text: &str,
    max_points: i32,
) -> String {
    format!(
        "Question: {question_text}\n\
         Expected answer / key points: {expected_answer}\n\
         Student's answer: {answer_text}\n\
         Maximum points: {max_points}\n\n\
         Grade the student's answer and return {{\"score\": <0..{max_points}>, \
         \"feedback\": \"<brief explanation>\"}}."
    )
}

/// Strips an optional Markdown code fence around the JSON payload.
pub(super) fn strip_code_fences(content: &str) -> &str {
    let mut cleaned = content.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    cleaned.trim()
}

/// Parses and validates the grader's JSON reply; the score is clamped to
/// `[0, max_points]`.
pub(super) fn parse_grade_payload(content: &str, max_points: i32) -> Result<GradeOutcome, String> {
    let cleaned = strip_code_fences(content);
    let value: Value =
        serde_json::from_str(cleaned).map_err(|err| format!("not valid JSON: {err}"))?;

    let object = value.as_object().ok_or_else(|| "response is not a JSON object".to_string())?;

    let score = object
        .get("score")
        .and_then(Value::as_f64)
        .ok_or_else(|| "missing numeric \"score\" field".to_string())?;
    if !score.is_finite() {
        return Err("score is not a finite number".to_string());
    }

    let feedback = object
        .get("feedback")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing string \"feedback\" field".to_string())?;

    let clamped = score.clamp(0.0, f64::from(max_points));
    Ok(GradeOutcome { score: round2(clamped), feedback: feedback.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::{routing::post, Json as AxumJson, Router};

    /// Chat-completion stub that replays canned contents and records the
    /// user prompt of every request.
    async fn spawn_chat_stub(
        replies: Vec<&'static str>,
    ) -> (SocketAddr, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let prompts = Arc::new(Mutex::new(Vec::new()));

        let calls_handle = calls.clone();
        let prompts_handle = prompts.clone();
        let app = Router::new().route(
            "/chat/completions",
            post(move |AxumJson(payload): AxumJson<Value>| {
                let calls = calls_handle.clone();
                let prompts = prompts_handle.clone();
                let replies = replies.clone();
                async move {
                    let index = calls.fetch_add(1, Ordering::SeqCst);
                    let user_prompt = payload["messages"][1]["content"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string();
                    prompts.lock().unwrap().push(user_prompt);

                    let content = replies[index.min(replies.len() - 1)];
                    AxumJson(json!({
                        "choices": [{"message": {"content": content}}]
                    }))
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
        let addr = listener.local_addr().expect("stub addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (addr, calls, prompts)
    }

    fn stub_grader(addr: SocketAddr, max_retries: u32) -> LlmGrader {
        LlmGrader {
            client: Client::new(),
            api_key: "sk-test".to_string(),
            base_url: format!("http://{addr}"),
            model: "gpt-4.1".to_string(),
            temperature: 0.3,
            max_tokens: 200,
            max_retries,
        }
    }

    #[tokio::test]
    async fn gives_up_after_exactly_max_retries_attempts() {
        let (addr, calls, _prompts) = spawn_chat_stub(vec!["SCORE: 5"]).await;
        let grader = stub_grader(addr, 3);

        let result = grader.grade("Q", "expected", "student", 10).await;

        assert!(matches!(result, Err(GradingError::InvalidResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn second_attempt_carries_the_shape_reminder_and_succeeds() {
        let (addr, calls, prompts) =
            spawn_chat_stub(vec!["not json at all", "{\"score\": 4, \"feedback\": \"ok\"}"]).await;
        let grader = stub_grader(addr, 3);

        let outcome = grader.grade("Q", "expected", "student", 10).await.expect("outcome");

        assert_eq!(outcome.score, 4.0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let prompts = prompts.lock().unwrap();
        assert!(!prompts[0].contains("Reminder: respond with a single JSON object"));
        assert!(prompts[1].contains("Reminder: respond with a single JSON object"));
    }

    #[test]
    fn strips_json_code_fences() {
        let fenced = "```json\n{\"score\": 4, \"feedback\": \"ok\"}\n```";
        assert_eq!(strip_code_fences(fenced), "{\"score\": 4, \"feedback\": \"ok\"}");

        let bare_fence = "```\n{\"score\": 4, \"feedback\": \"ok\"}\n```";
        assert_eq!(strip_code_fences(bare_fence), "{\"score\": 4, \"feedback\": \"ok\"}");

        let plain = "{\"score\": 4, \"feedback\": \"ok\"}";
        assert_eq!(strip_code_fences(plain), plain);
    }

    #[test]
    fn parses_valid_payload() {
        let outcome =
            parse_grade_payload("{\"score\": 7.5, \"feedback\": \"solid\"}", 10).expect("outcome");
        assert_eq!(outcome.score, 7.5);
        assert_eq!(outcome.feedback, "solid");
    }

    #[test]
    fn clamps_score_into_range() {
        let outcome =
            parse_grade_payload("{\"score\": 42, \"feedback\": \"generous\"}", 10).expect("outcome");
        assert_eq!(outcome.score, 10.0);

        let outcome =
            parse_grade_payload("{\"score\": -3, \"feedback\": \"harsh\"}", 10).expect("outcome");
        assert_eq!(outcome.score, 0.0);
    }

    #[test]
    fn rejects_non_json_and_missing_fields() {
        assert!(parse_grade_payload("SCORE: 5", 10).is_err());
        assert!(parse_grade_payload("{\"feedback\": \"no score\"}", 10).is_err());
        assert!(parse_grade_payload("{\"score\": \"five\", \"feedback\": \"bad\"}", 10).is_err());
        assert!(parse_grade_payload("{\"score\": 5}", 10).is_err());
        assert!(parse_grade_payload("[1, 2, 3]", 10).is_err());
    }

    #[test]
    fn fenced_payload_parses_end_to_end() {
        let outcome = parse_grade_payload("```json\n{\"score\": 3, \"feedback\": \"ok\"}\n```", 5)
            .expect("outcome");
        assert_eq!(outcome.score, 3.0);
    }
}
