//! HTTP implementation of the remote store.

use super::connectivity::Connectivity;
use super::remote::{NewSession, RemoteError, RemoteStore, SessionUpdate};
use crate::location::types::Sample;
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Response body of `POST /sessions`.
#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: Uuid,
}

/// JSON-over-HTTP remote store.
///
/// `POST {base}/sessions`, `PATCH {base}/sessions/{id}` and
/// `POST {base}/sessions/{id}/samples`.
pub struct HttpRemoteStore {
    http: reqwest::Client,
    base_url: String,
    connectivity: Option<Connectivity>,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            connectivity: None,
        })
    }

    /// Report connect failures and successes to a connectivity monitor.
    pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_connect() || e.is_timeout() {
            if let Some(connectivity) = &self.connectivity {
                connectivity.set_online(false);
            }
        }
        RemoteError::Network(e.to_string())
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        if let Some(connectivity) = &self.connectivity {
            connectivity.set_online(true);
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn create_session(&self, session: &NewSession) -> Result<Uuid, RemoteError> {
        let response = self
            .http
            .post(self.url("/sessions"))
            .json(session)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let created: CreatedSession = self
            .check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        tracing::debug!("Created remote session {}", created.id);
        Ok(created.id)
    }

    async fn update_session(
        &self,
        session_id: Uuid,
        update: &SessionUpdate,
    ) -> Result<(), RemoteError> {
        let response = self
            .http
            .patch(self.url(&format!("/sessions/{}", session_id)))
            .json(update)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.check_status(response).await?;
        Ok(())
    }

    async fn insert_samples(&self, session_id: Uuid, samples: &[Sample]) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(self.url(&format!("/sessions/{}/samples", session_id)))
            .json(samples)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        self.check_status(response).await?;
        Ok(())
    }
}
