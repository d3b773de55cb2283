use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use super::{AnalysisProvider, BilanReport, DocumentAnalysis};

/// HTTP client for the remote Groq-backed financial-analysis service.
///
/// Documents are sent as multipart uploads; no retries or fallbacks happen
/// here.
pub struct GroqAnalysisClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GroqAnalysisClient {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn file_part(path: &Path) -> anyhow::Result<Part> {
        let content = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        Ok(Part::bytes(content).file_name(filename))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[derive(Deserialize)]
struct ServiceError {
    detail: String,
}

fn error_from_response(status: reqwest::StatusCode, body: String) -> anyhow::Error {
    if let Ok(err) = serde_json::from_str::<ServiceError>(&body) {
        anyhow::anyhow!("analysis service error ({}): {}", status, err.detail)
    } else {
        anyhow::anyhow!("analysis service error ({}): {}", status, body)
    }
}

#[async_trait::async_trait]
impl AnalysisProvider for GroqAnalysisClient {
    async fn analyze_document(&self, path: &Path) -> anyhow::Result<DocumentAnalysis> {
        let form = Form::new().part("file", Self::file_part(path).await?);

        let response = self
            .authorize(self.client.post(self.endpoint("analyze-document")))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, body));
        }

        Ok(response.json::<DocumentAnalysis>().await?)
    }

    async fn generate_bilan(
        &self,
        paths: &[PathBuf],
        period_days: u32,
    ) -> anyhow::Result<BilanReport> {
        let mut form = Form::new().text("period_days", period_days.to_string());
        for path in paths {
            form = form.part("files", Self::file_part(path).await?);
        }

        let response = self
            .authorize(self.client.post(self.endpoint("bilan")))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_response(status, body));
        }

        Ok(response.json::<BilanReport>().await?)
    }

    fn name(&self) -> &str {
        "groq"
    }
}
