use crate::model::{CompletionTotals, Exercise, SessionConfig, Streak};
use anyhow::{Context, Result};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unexpected response body: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("not signed in (pass --token or set FASTNFIT_TOKEN)")]
    MissingToken,
}

impl ApiError {
    /// Whether a later attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Decode(_) | ApiError::MissingToken => false,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompletionRequest {
    workout_id: i64,
}

/// HTTP client for the workout backend.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(cfg: &SessionConfig, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.request_timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// `GET /api/workouts/{id}/exercises`
    pub async fn fetch_exercises(&self, workout_id: i64) -> Result<Vec<Exercise>, ApiError> {
        let url = format!("{}/api/workouts/{workout_id}/exercises", self.base_url);
        let req = self.authorize(self.http.get(url), false)?;
        decode(req.send().await?).await
    }

    /// `POST /api/workout-progress/complete`
    pub async fn complete_workout(&self, workout_id: i64) -> Result<CompletionTotals, ApiError> {
        let url = format!("{}/api/workout-progress/complete", self.base_url);
        let req = self
            .authorize(self.http.post(url), true)?
            .json(&CompletionRequest { workout_id });
        decode(req.send().await?).await
    }

    /// `GET /api/home/streak`
    pub async fn fetch_streak(&self) -> Result<Streak, ApiError> {
        let url = format!("{}/api/home/streak", self.base_url);
        let req = self.authorize(self.http.get(url), true)?;
        decode(req.send().await?).await
    }

    fn authorize(&self, req: RequestBuilder, required: bool) -> Result<RequestBuilder, ApiError> {
        match self.token.as_deref() {
            Some(token) => Ok(req.bearer_auth(token)),
            None if required => Err(ApiError::MissingToken),
            None => Ok(req),
        }
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let status = resp.status();
    let url = resp.url().path().to_string();
    let body = resp.bytes().await?;
    debug!(%status, path = %url, bytes = body.len(), "backend response");
    if !status.is_success() {
        return Err(ApiError::Status {
            status,
            body: String::from_utf8_lossy(&body).chars().take(200).collect(),
        });
    }
    serde_json::from_slice(&body).map_err(ApiError::Decode)
}
