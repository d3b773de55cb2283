use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub analysis_service_url: String,
    pub analysis_api_key: Option<String>,
    pub staging_dir: PathBuf,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env::var("APP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("APP_PORT must be a number"),
            environment: env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            analysis_service_url: env::var("ANALYSIS_SERVICE_URL")
                .expect("ANALYSIS_SERVICE_URL must be set"),
            analysis_api_key: env::var("ANALYSIS_API_KEY").ok(),
            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            otel_service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "financial-analysis-gateway".to_string()),
            otel_exporter_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
