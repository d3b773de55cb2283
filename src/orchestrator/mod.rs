use std::path::Path;
use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::analysis::fetch::DocumentFetcher;
use crate::analysis::{AnalysisProvider, BilanReport};
use crate::error::AppError;
use crate::staging::StagedSet;
use crate::telemetry::metrics::{
    ANALYZE_DURATION, BILAN_DURATION, DOCUMENTS_STAGED, FETCH_SKIPPED,
};

/// A document received in the request body.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub filename: String,
    pub content: Vec<u8>,
}

/// A reference to an externally hosted document.
#[derive(Debug, Clone)]
pub struct DocumentRef {
    pub id: String,
    pub filename: String,
    pub remote_url: String,
}

/// Response envelope for single-document analysis.
#[derive(Debug, Serialize)]
pub struct AnalysisSummary {
    pub document_id: String,
    pub groq_financial_analysis: serde_json::Value,
    pub processing_time_ms: u64,
}

/// Stages one document, delegates to the analysis capability, and releases
/// the staged file on every exit path.
#[tracing::instrument(
    name = "orchestrate analyze",
    skip(provider, content),
    fields(document.filename = %filename, document.id = tracing::field::Empty)
)]
pub async fn analyze_document(
    provider: &dyn AnalysisProvider,
    staging_dir: &Path,
    content: &[u8],
    filename: &str,
) -> Result<AnalysisSummary, AppError> {
    let start = Instant::now();
    let token = Uuid::new_v4().to_string();
    tracing::Span::current().record("document.id", token.as_str());

    let mut staged = StagedSet::new(staging_dir);
    let result = match staged.stage(&token, filename, content).await {
        Ok(doc) => {
            DOCUMENTS_STAGED.add(1, &[]);
            provider.analyze_document(&doc.path).await
        }
        Err(e) => Err(e.into()),
    };
    staged.release().await;

    let analysis = result.map_err(|e| AppError::Analysis(e.to_string()))?;
    ANALYZE_DURATION.record(start.elapsed().as_secs_f64(), &[]);

    Ok(AnalysisSummary {
        document_id: analysis.document_id,
        groq_financial_analysis: analysis.financial_analysis,
        processing_time_ms: analysis.processing_time_ms,
    })
}

/// Stages the uploaded documents and delegates bilan generation over the
/// reporting window. A document that fails to stage is skipped; the
/// capability is invoked with whatever staged successfully, and every staged
/// file is released afterwards.
#[tracing::instrument(
    name = "orchestrate bilan",
    skip(provider, files),
    fields(bilan.files = files.len(), bilan.period_days = period_days)
)]
pub async fn generate_bilan(
    provider: &dyn AnalysisProvider,
    staging_dir: &Path,
    files: &[UploadedDocument],
    period_days: u32,
) -> Result<BilanReport, AppError> {
    let start = Instant::now();

    let mut staged = StagedSet::new(staging_dir);
    for file in files {
        let token = Uuid::new_v4().to_string();
        match staged.stage(&token, &file.filename, &file.content).await {
            Ok(_) => DOCUMENTS_STAGED.add(1, &[]),
            Err(e) => {
                tracing::warn!(filename = %file.filename, error = %e, "failed to stage document, skipping");
            }
        }
    }

    let result = provider.generate_bilan(&staged.paths(), period_days).await;
    staged.release().await;

    let report = result.map_err(|e| AppError::Bilan(e.to_string()))?;
    BILAN_DURATION.record(start.elapsed().as_secs_f64(), &[]);
    Ok(report)
}

/// Fetches each referenced document, stages the ones that arrive with a
/// success status, delegates bilan generation, and merges the caller's
/// business_info into the result (capability keys win on collision).
#[tracing::instrument(
    name = "orchestrate bilan_from_refs",
    skip(provider, fetcher, business_info),
    fields(bilan.refs = refs.len(), bilan.period_days = period_days)
)]
pub async fn generate_bilan_from_refs(
    provider: &dyn AnalysisProvider,
    fetcher: &dyn DocumentFetcher,
    staging_dir: &Path,
    refs: &[DocumentRef],
    period_days: u32,
    business_info: serde_json::Value,
) -> Result<BilanReport, AppError> {
    if refs.is_empty() {
        return Err(AppError::Validation("No documents provided".to_string()));
    }

    let start = Instant::now();

    let mut staged = StagedSet::new(staging_dir);
    let result = fetch_stage_generate(provider, fetcher, &mut staged, refs, period_days).await;
    staged.release().await;

    let report = result?;
    BILAN_DURATION.record(start.elapsed().as_secs_f64(), &[]);

    let mut body = BilanReport::new();
    body.insert("business_info".to_string(), business_info);
    body.extend(report);
    Ok(body)
}

async fn fetch_stage_generate(
    provider: &dyn AnalysisProvider,
    fetcher: &dyn DocumentFetcher,
    staged: &mut StagedSet,
    refs: &[DocumentRef],
    period_days: u32,
) -> Result<BilanReport, AppError> {
    for doc in refs {
        if doc.remote_url.is_empty() {
            continue;
        }

        let fetched = fetcher
            .fetch(&doc.remote_url)
            .await
            .map_err(|e| AppError::Processing(e.to_string()))?;

        if !fetched.is_success() {
            FETCH_SKIPPED.add(1, &[]);
            tracing::warn!(
                document_id = %doc.id,
                status = fetched.status,
                "remote fetch returned non-success status, skipping document"
            );
            continue;
        }

        staged
            .stage(&doc.id, &doc.filename, &fetched.body)
            .await
            .map_err(|e| AppError::Processing(e.to_string()))?;
        DOCUMENTS_STAGED.add(1, &[]);
    }

    if staged.is_empty() {
        // the capability's own error path governs the empty set
        tracing::warn!("no documents staged, delegating empty set to analysis service");
    }

    provider
        .generate_bilan(&staged.paths(), period_days)
        .await
        .map_err(|e| AppError::Processing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use serde_json::{Value, json};
    use tempfile::tempdir;

    use crate::analysis::DocumentAnalysis;
    use crate::analysis::fetch::FetchedDocument;

    #[derive(Default)]
    struct RecordingProvider {
        fail: bool,
        extra_report_field: Option<(String, Value)>,
        analyze_calls: Mutex<Vec<PathBuf>>,
        bilan_calls: Mutex<Vec<(Vec<PathBuf>, u32)>>,
    }

    #[async_trait::async_trait]
    impl AnalysisProvider for RecordingProvider {
        async fn analyze_document(&self, path: &Path) -> anyhow::Result<DocumentAnalysis> {
            assert!(path.exists(), "staged file must exist during analysis");
            self.analyze_calls.lock().unwrap().push(path.to_path_buf());
            if self.fail {
                anyhow::bail!("groq unavailable");
            }
            Ok(DocumentAnalysis {
                document_id: "doc-from-service".to_string(),
                financial_analysis: json!({"total": 42}),
                processing_time_ms: 17,
            })
        }

        async fn generate_bilan(
            &self,
            paths: &[PathBuf],
            period_days: u32,
        ) -> anyhow::Result<BilanReport> {
            for p in paths {
                assert!(p.exists(), "staged files must exist during bilan");
            }
            self.bilan_calls
                .lock()
                .unwrap()
                .push((paths.to_vec(), period_days));
            if self.fail {
                anyhow::bail!("groq unavailable");
            }
            let mut report = BilanReport::new();
            report.insert("summary".to_string(), json!("ok"));
            report.insert("document_count".to_string(), json!(paths.len()));
            if let Some((key, value)) = &self.extra_report_field {
                report.insert(key.clone(), value.clone());
            }
            Ok(report)
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[derive(Default)]
    struct FakeFetcher {
        not_found: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DocumentFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> anyhow::Result<FetchedDocument> {
            self.calls.lock().unwrap().push(url.to_string());
            if self.not_found.iter().any(|u| u == url) {
                Ok(FetchedDocument {
                    status: 404,
                    body: vec![],
                })
            } else {
                Ok(FetchedDocument {
                    status: 200,
                    body: b"remote bytes".to_vec(),
                })
            }
        }
    }

    struct FailingFetcher;

    #[async_trait::async_trait]
    impl DocumentFetcher for FailingFetcher {
        async fn fetch(&self, _url: &str) -> anyhow::Result<FetchedDocument> {
            anyhow::bail!("connection refused")
        }
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn doc_ref(id: &str, filename: &str, url: &str) -> DocumentRef {
        DocumentRef {
            id: id.to_string(),
            filename: filename.to_string(),
            remote_url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_analyze_returns_envelope_and_releases_staging() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider::default();

        let summary = analyze_document(&provider, dir.path(), b"pdf bytes", "invoice.pdf")
            .await
            .unwrap();

        assert_eq!(summary.document_id, "doc-from-service");
        assert_eq!(summary.groq_financial_analysis, json!({"total": 42}));
        assert_eq!(summary.processing_time_ms, 17);

        let calls = provider.analyze_calls.lock().unwrap();
        let staged_name = calls[0].file_name().unwrap().to_str().unwrap();
        assert!(staged_name.starts_with("temp_"));
        assert!(staged_name.ends_with("_invoice.pdf"));

        assert_eq!(entries(dir.path()), 0, "staged file must be released");
    }

    #[tokio::test]
    async fn test_analyze_failure_wraps_cause_and_releases_staging() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider {
            fail: true,
            ..Default::default()
        };

        let err = analyze_document(&provider, dir.path(), b"x", "invoice.pdf")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Analysis(_)));
        assert_eq!(
            err.to_string(),
            "Error analyzing document: groq unavailable"
        );
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_analyze_staging_failure_is_analysis_error() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider::default();

        let err = analyze_document(&provider, dir.path(), b"x", "")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Analysis(_)));
        assert!(provider.analyze_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bilan_proceeds_with_staged_subset() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider::default();
        let files = vec![
            UploadedDocument {
                filename: "jan.pdf".to_string(),
                content: b"1".to_vec(),
            },
            UploadedDocument {
                // unstageable: empty filename
                filename: String::new(),
                content: b"2".to_vec(),
            },
            UploadedDocument {
                filename: "feb.pdf".to_string(),
                content: b"3".to_vec(),
            },
        ];

        let report = generate_bilan(&provider, dir.path(), &files, 30)
            .await
            .unwrap();

        assert_eq!(report["document_count"], json!(2));
        let calls = provider.bilan_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.len(), 2);
        assert_eq!(calls[0].1, 30);

        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_bilan_failure_wraps_cause_and_releases_staging() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider {
            fail: true,
            ..Default::default()
        };
        let files = vec![UploadedDocument {
            filename: "jan.pdf".to_string(),
            content: b"1".to_vec(),
        }];

        let err = generate_bilan(&provider, dir.path(), &files, 30)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Bilan(_)));
        assert_eq!(err.to_string(), "Error generating bilan: groq unavailable");
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_bilan_from_refs_empty_list_fails_before_any_side_effect() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider::default();
        let fetcher = FakeFetcher::default();

        let err =
            generate_bilan_from_refs(&provider, &fetcher, dir.path(), &[], 90, json!({}))
                .await
                .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(err.to_string(), "No documents provided");
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert!(provider.bilan_calls.lock().unwrap().is_empty());
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_bilan_from_refs_merges_business_info() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider::default();
        let fetcher = FakeFetcher::default();
        let refs = vec![doc_ref("d1", "a.pdf", "https://cdn.example/a.pdf")];

        let body = generate_bilan_from_refs(
            &provider,
            &fetcher,
            dir.path(),
            &refs,
            90,
            json!({"name": "Acme", "period_start": "2024-01-01"}),
        )
        .await
        .unwrap();

        assert_eq!(body["business_info"]["name"], json!("Acme"));
        assert_eq!(body["summary"], json!("ok"));
        assert_eq!(body["document_count"], json!(1));
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_bilan_from_refs_capability_keys_win_on_collision() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider {
            extra_report_field: Some(("business_info".to_string(), json!("from-capability"))),
            ..Default::default()
        };
        let fetcher = FakeFetcher::default();
        let refs = vec![doc_ref("d1", "a.pdf", "https://cdn.example/a.pdf")];

        let body = generate_bilan_from_refs(
            &provider,
            &fetcher,
            dir.path(),
            &refs,
            90,
            json!({"name": "Acme"}),
        )
        .await
        .unwrap();

        assert_eq!(body["business_info"], json!("from-capability"));
    }

    #[tokio::test]
    async fn test_bilan_from_refs_skips_failed_fetch_and_empty_url() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider::default();
        let fetcher = FakeFetcher {
            not_found: vec!["https://cdn.example/missing.pdf".to_string()],
            ..Default::default()
        };
        let refs = vec![
            doc_ref("d1", "a.pdf", "https://cdn.example/a.pdf"),
            doc_ref("d2", "missing.pdf", "https://cdn.example/missing.pdf"),
            doc_ref("d3", "no-url.pdf", ""),
        ];

        let body = generate_bilan_from_refs(
            &provider,
            &fetcher,
            dir.path(),
            &refs,
            90,
            json!({}),
        )
        .await
        .unwrap();

        // only the successfully fetched document reaches the capability
        assert_eq!(body["document_count"], json!(1));
        let calls = provider.bilan_calls.lock().unwrap();
        assert_eq!(calls[0].1, 90);
        let staged_name = calls[0].0[0].file_name().unwrap().to_str().unwrap();
        assert_eq!(staged_name, "temp_d1_a.pdf");

        // the empty-url reference is skipped before any fetch
        assert_eq!(fetcher.calls.lock().unwrap().len(), 2);
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_bilan_from_refs_transport_error_is_processing_error() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider::default();
        let refs = vec![doc_ref("d1", "a.pdf", "https://cdn.example/a.pdf")];

        let err = generate_bilan_from_refs(
            &provider,
            &FailingFetcher,
            dir.path(),
            &refs,
            90,
            json!({}),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Processing(_)));
        assert_eq!(
            err.to_string(),
            "Error processing bilan: connection refused"
        );
        assert!(provider.bilan_calls.lock().unwrap().is_empty());
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_bilan_from_refs_releases_staging_after_capability_failure() {
        let dir = tempdir().unwrap();
        let provider = RecordingProvider {
            fail: true,
            ..Default::default()
        };
        let fetcher = FakeFetcher::default();
        let refs = vec![doc_ref("d1", "a.pdf", "https://cdn.example/a.pdf")];

        let err = generate_bilan_from_refs(
            &provider,
            &fetcher,
            dir.path(),
            &refs,
            90,
            json!({}),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AppError::Processing(_)));
        assert_eq!(entries(dir.path()), 0);
    }
}
