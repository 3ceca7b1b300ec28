//! Run configuration
//!
//! Values come from, lowest to highest precedence: built-in defaults, a TOML
//! file (`dashcheck.toml` in the working directory unless `--config` points
//! elsewhere), then environment variables and command-line flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CheckError, CheckResult};
use crate::playwright::Browser;
use crate::spec::Viewport;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "dashcheck.toml";

/// Top-level run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Dashboard under test
    pub target_url: String,

    /// Where screenshots are written
    pub output_dir: PathBuf,

    /// Wait for each visibility check. Clicks and scrolls keep Playwright's
    /// action timeout unless a step sets `timeout_ms`.
    pub timeout_ms: u64,

    /// Ceiling for a whole scenario, after which the browser is killed
    pub scenario_timeout_secs: u64,

    /// Browser engine
    pub browser: Browser,

    /// Run without a visible window
    pub headless: bool,

    /// Overrides each scenario's own viewport when set
    pub viewport: Option<Viewport>,

    /// Target server handling
    pub server: ServerSettings,

    /// Baseline comparison
    pub visual: VisualSettings,

    /// JSON report destination
    pub report: Option<PathBuf>,

    /// Node.js executable that runs the generated scripts
    pub node: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_url: "http://localhost:3000".to_string(),
            output_dir: PathBuf::from("jules-scratch/verification"),
            timeout_ms: 5000,
            scenario_timeout_secs: 120,
            browser: Browser::Chromium,
            headless: true,
            viewport: None,
            server: ServerSettings::default(),
            visual: VisualSettings::default(),
            report: None,
            node: PathBuf::from("node"),
        }
    }
}

/// How the target server is found or started
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Keep probing the target URL this long before giving up (0 = probe once)
    pub wait_secs: u64,

    /// Shell command that starts the dashboard, e.g. `npm run dev`
    pub command: Option<String>,

    /// Working directory for `command`
    pub cwd: Option<PathBuf>,

    /// How long a started server gets to become reachable
    pub startup_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            wait_secs: 0,
            command: None,
            cwd: None,
            startup_timeout_secs: 60,
        }
    }
}

/// Visual regression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualSettings {
    /// Directory of baseline PNGs; comparison is off when unset
    pub baseline_dir: Option<PathBuf>,

    /// Directory for diff images (defaults to `<output_dir>/diffs`)
    pub diff_dir: Option<PathBuf>,

    /// Allowed differing pixels, in percent
    pub threshold: f64,

    /// Copy fresh screenshots over the baselines after the run
    pub update_baselines: bool,
}

impl Default for VisualSettings {
    fn default() -> Self {
        Self {
            baseline_dir: None,
            diff_dir: None,
            threshold: 0.5,
            update_baselines: false,
        }
    }
}

impl RunConfig {
    /// Load configuration from a file that must exist
    pub fn load(path: &Path) -> CheckResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CheckError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults if it is absent
    pub fn load_or_default(path: &Path) -> CheckResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Reject values that cannot produce a meaningful run
    pub fn validate(&self) -> CheckResult<()> {
        let url = reqwest::Url::parse(&self.target_url).map_err(|e| {
            CheckError::Config(format!("target_url '{}': {}", self.target_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CheckError::Config(format!(
                "target_url '{}' must be http or https",
                self.target_url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(CheckError::Config("timeout_ms must be greater than zero".into()));
        }
        if self.scenario_timeout_secs == 0 {
            return Err(CheckError::Config(
                "scenario_timeout_secs must be greater than zero".into(),
            ));
        }
        if !(0.0..=100.0).contains(&self.visual.threshold) {
            return Err(CheckError::Config(format!(
                "visual threshold {} is outside 0-100",
                self.visual.threshold
            )));
        }
        if self.visual.update_baselines && self.visual.baseline_dir.is_none() {
            return Err(CheckError::Config(
                "update_baselines requires a baseline_dir".into(),
            ));
        }
        Ok(())
    }

    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_secs(self.scenario_timeout_secs)
    }

    /// Resolve a screenshot path from a scenario against the output directory
    pub fn artifact_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }

    /// Resolve a navigation URL from a scenario against the target URL
    pub fn resolve_url(&self, url: &str) -> CheckResult<String> {
        if let Ok(absolute) = reqwest::Url::parse(url) {
            return Ok(absolute.to_string());
        }
        let base = reqwest::Url::parse(&self.target_url).map_err(|e| {
            CheckError::Config(format!("target_url '{}': {}", self.target_url, e))
        })?;
        base.join(url)
            .map(|u| u.to_string())
            .map_err(|e| CheckError::Config(format!("url '{}': {}", url, e)))
    }

    pub fn diff_dir(&self) -> PathBuf {
        self.visual
            .diff_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("diffs"))
    }
}
