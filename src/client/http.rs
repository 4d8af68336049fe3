use super::IngestionClient;
use crate::capture::Artifact;
use crate::consultation::{Consultation, NewConsultation};
use crate::error::{AuthError, Error, Result};
use crate::ingest::StoredArtifact;
use anyhow::Context;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Multipart field carrying the artifact bytes
pub const ARTIFACT_FIELD: &str = "videoFile";

/// Transport against a remote consultation server
#[derive(Clone)]
pub struct HttpIngestionClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default, rename = "fileName")]
    file_name: Option<String>,
}

impl HttpIngestionClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create ingestion HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_record(&self, path: &str, record: &NewConsultation) -> Result<Consultation> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(record)
            .send()
            .await
            .map_err(transport_error)?;

        decode(response).await
    }
}

#[async_trait::async_trait]
impl IngestionClient for HttpIngestionClient {
    async fn upload(&self, artifact: &Artifact) -> Result<StoredArtifact> {
        let part = Part::bytes(artifact.data.clone())
            .file_name(artifact.file_name.clone())
            .mime_str(&artifact.content_type)
            .map_err(|e| Error::validation(format!("Bad content type {}: {e}", artifact.content_type)))?;
        let form = Form::new().part(ARTIFACT_FIELD, part);

        debug!(
            "Uploading {} ({} bytes) to {}",
            artifact.file_name,
            artifact.data.len(),
            self.base_url
        );

        let response = self
            .client
            .post(self.url("/consultations/upload"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        decode(response).await
    }

    async fn create(&self, record: &NewConsultation) -> Result<Consultation> {
        self.post_record("/consultations", record).await
    }

    async fn retry_create(&self, record: &NewConsultation) -> Result<Consultation> {
        self.post_record("/consultations/retry", record).await
    }
}

fn transport_error(error: reqwest::Error) -> Error {
    warn!("Ingestion request failed: {}", error);
    Error::Server(anyhow::Error::new(error).context("Ingestion request failed"))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| Error::Server(anyhow::Error::new(e).context("Malformed server response")));
    }

    let body = response.json::<ErrorBody>().await.unwrap_or(ErrorBody {
        code: String::new(),
        message: status.to_string(),
        file_name: None,
    });
    Err(error_from_status(status, body))
}

/// Rebuild the server's error from status and body
fn error_from_status(status: StatusCode, body: ErrorBody) -> Error {
    let message = body.message;
    match status {
        StatusCode::BAD_REQUEST => Error::Validation(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        StatusCode::UNAUTHORIZED if message == AuthError::MissingToken.to_string() => {
            Error::Auth(AuthError::MissingToken)
        }
        StatusCode::UNAUTHORIZED => Error::Auth(AuthError::InvalidToken),
        StatusCode::FORBIDDEN => Error::forbidden(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        _ => match (body.code.as_str(), body.file_name) {
            ("PARTIAL_INGESTION", Some(file_name)) => Error::PartialIngestion {
                file_name,
                source: Box::new(Error::Server(anyhow::anyhow!(message))),
            },
            ("STORAGE_ERROR", _) => Error::Storage(message),
            _ => Error::Server(anyhow::anyhow!("{status}: {message}")),
        },
    }
}
