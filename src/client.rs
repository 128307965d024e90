// src/client.rs

//! Access to the LMS exam attempt endpoints.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use url::Url;

use crate::{
    error::AppError,
    models::{
        attempt::{
            AttemptAction, CreateAttemptRequest, CreateAttemptResponse, PollResponse,
            TransitionRequest,
        },
        exam::ExamAttemptsData,
    },
};

const ATTEMPT_PATH: &str = "api/edx_proctoring/v1/proctored_exam/attempt";

/// Where to poll an attempt's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollTarget {
    /// Poll URL handed out by the LMS, absolute or relative to the LMS root.
    Url(String),
    /// Poll by the sequence the exam lives in.
    Sequence(String),
}

impl PollTarget {
    /// Prefers the attempt's poll URL and falls back to the sequence id.
    pub fn resolve(poll_url: Option<&str>, sequence_id: Option<&str>) -> Option<Self> {
        match (poll_url, sequence_id) {
            (Some(url), _) if !url.is_empty() => Some(Self::Url(url.to_string())),
            (_, Some(seq)) if !seq.is_empty() => Some(Self::Sequence(seq.to_string())),
            _ => None,
        }
    }
}

/// Status fetch and transition calls the session depends on.
#[async_trait]
pub trait AttemptApi: Send + Sync {
    async fn fetch_exam_attempts(
        &self,
        course_id: &str,
        sequence_id: &str,
    ) -> Result<ExamAttemptsData, AppError>;

    /// Creates an attempt and returns its id.
    async fn create_attempt(
        &self,
        exam_id: i64,
        start_clock: bool,
        attempt_proctored: bool,
    ) -> Result<i64, AppError>;

    /// Callers refetch afterwards; the response body is not used.
    async fn transition_attempt(&self, attempt_id: i64, action: AttemptAction)
    -> Result<(), AppError>;

    /// Returns `None` when there was nothing to poll.
    async fn poll_attempt(&self, target: Option<PollTarget>)
    -> Result<Option<PollResponse>, AppError>;
}

/// Typed HTTP client for the LMS.
#[derive(Clone)]
pub struct LmsClient {
    http: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
}

impl LmsClient {
    /// Creates a new client bound to the provided LMS root.
    pub fn new(base_url: Url, auth_token: Option<String>) -> Self {
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path().trim_end_matches('/'));
            base_url.set_path(&path);
        }

        Self {
            http: reqwest::Client::new(),
            base_url,
            auth_token,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, AppError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
                .unwrap_or(body);
            return Err(AppError::Upstream(format!("LMS returned {}: {}", status, detail)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Upstream(format!("Invalid LMS response: {}", e)))
    }
}

fn encode_path_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

#[async_trait]
impl AttemptApi for LmsClient {
    async fn fetch_exam_attempts(
        &self,
        course_id: &str,
        sequence_id: &str,
    ) -> Result<ExamAttemptsData, AppError> {
        let mut url = self.base_url.join(&format!(
            "{}/course_id/{}",
            ATTEMPT_PATH,
            encode_path_segment(course_id)
        ))?;
        url.query_pairs_mut()
            .append_pair("content_id", sequence_id)
            .append_pair("is_learning_mfe", "true");

        tracing::debug!(%url, "fetching exam attempts");
        self.send(self.request(Method::GET, url)).await
    }

    async fn create_attempt(
        &self,
        exam_id: i64,
        start_clock: bool,
        attempt_proctored: bool,
    ) -> Result<i64, AppError> {
        let url = self.base_url.join(ATTEMPT_PATH)?;
        let body = CreateAttemptRequest {
            exam_id,
            start_clock,
            attempt_proctored,
        };

        let created: CreateAttemptResponse =
            self.send(self.request(Method::POST, url).json(&body)).await?;
        tracing::info!(exam_id, attempt_id = created.exam_attempt_id, "exam attempt created");
        Ok(created.exam_attempt_id)
    }

    async fn transition_attempt(
        &self,
        attempt_id: i64,
        action: AttemptAction,
    ) -> Result<(), AppError> {
        let url = self
            .base_url
            .join(&format!("{}/{}", ATTEMPT_PATH, attempt_id))?;
        let body = TransitionRequest { action };

        tracing::info!(attempt_id, action = action.as_str(), "transitioning exam attempt");
        let _: IgnoredAny = self.send(self.request(Method::PUT, url).json(&body)).await?;
        Ok(())
    }

    async fn poll_attempt(
        &self,
        target: Option<PollTarget>,
    ) -> Result<Option<PollResponse>, AppError> {
        let url = match target {
            Some(PollTarget::Url(poll_url)) => self.base_url.join(poll_url.trim_start_matches('/'))?,
            Some(PollTarget::Sequence(sequence_id)) => self.base_url.join(&format!(
                "{}/sequence/{}/poll",
                ATTEMPT_PATH,
                encode_path_segment(&sequence_id)
            ))?,
            None => {
                tracing::error!("Cannot poll exam attempt: neither a poll url nor a sequence id was given");
                return Ok(None);
            }
        };

        self.send(self.request(Method::GET, url)).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_target_prefers_url() {
        assert_eq!(
            PollTarget::resolve(Some("/api/poll/1"), Some("block-v1:x")),
            Some(PollTarget::Url("/api/poll/1".to_string()))
        );
        assert_eq!(
            PollTarget::resolve(Some(""), Some("block-v1:x")),
            Some(PollTarget::Sequence("block-v1:x".to_string()))
        );
        assert_eq!(PollTarget::resolve(None, None), None);
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let client = LmsClient::new(Url::parse("http://lms.local/prefix").unwrap(), None);
        assert_eq!(client.base_url().as_str(), "http://lms.local/prefix/");
    }

    #[tokio::test]
    async fn test_poll_without_target_returns_none() {
        let client = LmsClient::new(Url::parse("http://127.0.0.1:9").unwrap(), None);
        assert_eq!(client.poll_attempt(None).await, Ok(None));
    }

    /// LMS stand-in that accepts only `ping` transitions.
    async fn spawn_lms() -> Url {
        use axum::{Json, Router, http::StatusCode, routing::put};

        async fn transition(
            Json(body): Json<serde_json::Value>,
        ) -> (StatusCode, Json<serde_json::Value>) {
            if body["action"] == "ping" {
                (StatusCode::OK, Json(serde_json::json!({ "exam_attempt_id": 5 })))
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "detail": "bad action" })),
                )
            }
        }

        let app = Router::new().route(
            "/api/edx_proctoring/v1/proctored_exam/attempt/{attempt_id}",
            put(transition),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_transition_ignores_response_body() {
        let client = LmsClient::new(spawn_lms().await, None);

        assert_eq!(client.transition_attempt(5, AttemptAction::Ping).await, Ok(()));

        match client.transition_attempt(5, AttemptAction::Submit).await {
            Err(AppError::Upstream(message)) => assert!(message.contains("bad action")),
            other => panic!("expected upstream error, got {:?}", other),
        }
    }
}
