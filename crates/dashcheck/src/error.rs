//! Error types for dashboard verification

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Target server unreachable at {url} after {attempts} attempt(s)")]
    ServerUnreachable { url: String, attempts: usize },

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Playwright not found. Install with: npm install playwright && npx playwright install chromium")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Scenario parse error: {0}")]
    SpecParse(String),

    #[error("Invalid locator '{input}': {reason}")]
    InvalidLocator { input: String, reason: String },

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("Visual regression: {0}")]
    VisualRegression(String),

    #[error("Screenshot mismatch: {name} differs by {diff_percent:.2}% (threshold: {threshold:.2}%)")]
    ScreenshotMismatch {
        name: String,
        diff_percent: f64,
        threshold: f64,
    },

    #[error("Baseline not found: {0}")]
    BaselineNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl CheckError {
    /// Process exit code for this failure.
    ///
    /// 1 means the dashboard itself failed a check, 2 means the run could not
    /// be set up, 3 means nothing was listening at the target URL.
    pub fn exit_code(&self) -> i32 {
        match self {
            CheckError::StepFailed { .. }
            | CheckError::Timeout(_)
            | CheckError::VisualRegression(_)
            | CheckError::ScreenshotMismatch { .. } => 1,
            CheckError::ServerUnreachable { .. } => 3,
            _ => 2,
        }
    }
}

pub type CheckResult<T> = Result<T, CheckError>;
