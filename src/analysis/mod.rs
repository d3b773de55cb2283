pub mod fetch;
pub mod groq;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use groq::GroqAnalysisClient;

/// Result of analyzing a single document. `financial_analysis` is opaque to
/// this layer and passed through to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub document_id: String,
    pub financial_analysis: serde_json::Value,
    pub processing_time_ms: u64,
}

/// Consolidated financial summary over a set of documents, passed through
/// verbatim as a JSON object.
pub type BilanReport = serde_json::Map<String, serde_json::Value>;

/// The external financial-analysis capability. All domain intelligence lives
/// behind this seam.
#[async_trait::async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze_document(&self, path: &Path) -> anyhow::Result<DocumentAnalysis>;

    async fn generate_bilan(
        &self,
        paths: &[PathBuf],
        period_days: u32,
    ) -> anyhow::Result<BilanReport>;

    fn name(&self) -> &str;
}
