//! HTTP implementation of the exam backend contracts.
//!
//! Talks to the exam server's REST surface: start/resume, terminal submit,
//! and the security-event fallback. Responses arrive wrapped in the
//! server's `{status, message, data}` envelope; error bodies carry an
//! `error` message.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use invigil_core::error::BackendError;
use invigil_core::model::ViolationKind;
use invigil_core::traits::{
    ExamBackend, StartAttemptRequest, StartedAttempt, SubmitAck, SubmitRequest,
};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Exam backend over HTTP.
pub struct HttpExamBackend {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpExamBackend {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Self {
        let timeout = timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        }
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout(self.timeout_secs)
                } else {
                    BackendError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(BackendError::Api { status, message });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        Ok(envelope.data)
    }
}

/// The server wraps every payload: `{status, message, data}`.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: String,
}

#[derive(Serialize)]
struct SecurityEventBody<'a> {
    attempt_id: &'a str,
    event_type: ViolationKind,
    details: &'a str,
}

#[async_trait]
impl ExamBackend for HttpExamBackend {
    #[instrument(skip(self, request), fields(exam_id = %request.exam_id))]
    async fn start_attempt(
        &self,
        request: &StartAttemptRequest,
    ) -> Result<StartedAttempt, BackendError> {
        self.post_json("/attempts/start", request).await
    }

    #[instrument(skip(self, request), fields(attempt_id = %request.attempt_id))]
    async fn submit_attempt(&self, request: &SubmitRequest) -> Result<SubmitAck, BackendError> {
        match self.post_json("/attempts/submit", request).await {
            // The server already holds a recorded submission for this
            // attempt; a duplicate delivery is a success, not an error.
            Err(BackendError::Api { status: 409, .. }) => Ok(SubmitAck::default()),
            other => other,
        }
    }

    #[instrument(skip(self, detail))]
    async fn log_security_event(
        &self,
        attempt_id: &str,
        kind: ViolationKind,
        detail: &str,
    ) -> Result<(), BackendError> {
        let body = SecurityEventBody {
            attempt_id,
            event_type: kind,
            details: detail,
        };
        let _: serde_json::Value = self.post_json("/security/events", &body).await?;
        Ok(())
    }
}
