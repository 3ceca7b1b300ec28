//! Scenario runner that orchestrates the target server, Playwright, and
//! visual comparison

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::{CheckError, CheckResult};
use crate::playwright::{EventStatus, PlaywrightHandle, ScriptEvent, ScriptRun};
use crate::server::{self, ServerConfig, ServerHandle};
use crate::spec::{Scenario, Step};
use crate::visual::{VisualConfig, VisualDiff, VisualTester};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    /// An earlier step failed, so this one never ran
    NotRun,
}

/// Outcome of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub screenshot_path: Option<PathBuf>,
}

/// Why a scenario did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A step's check failed against the page
    Check,
    /// The browser could not be launched or the script broke outside a step
    Setup,
    /// The whole scenario ran past its ceiling
    Timeout,
    /// Screenshots differ from their baselines
    Visual,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    /// Screenshots written, in capture order
    pub screenshots: Vec<PathBuf>,
    pub visual_diffs: Vec<VisualDiff>,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
}

impl ScenarioResult {
    /// Fold the script's events into per-step results.
    ///
    /// `screenshot_paths[i]` is the resolved output path of step `i` when it
    /// is a screenshot step.
    pub fn from_run(
        scenario: &Scenario,
        run: &ScriptRun,
        screenshot_paths: &[Option<PathBuf>],
        duration: Duration,
    ) -> Self {
        let mut steps: Vec<StepResult> = scenario
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepResult {
                index,
                name: step.name(),
                status: StepStatus::NotRun,
                duration_ms: 0,
                error: None,
                screenshot_path: None,
            })
            .collect();

        let mut failure = None;
        let mut error = None;

        for event in &run.events {
            match event {
                ScriptEvent::Step {
                    index,
                    status,
                    duration_ms,
                    error: step_error,
                } => {
                    let Some(result) = steps.get_mut(*index) else {
                        warn!("Ignoring event for unknown step {}", index);
                        continue;
                    };
                    result.duration_ms = *duration_ms;
                    match status {
                        EventStatus::Ok => {
                            result.status = StepStatus::Passed;
                            result.screenshot_path =
                                screenshot_paths.get(*index).cloned().flatten();
                        }
                        EventStatus::Failed => {
                            let reason = step_error
                                .as_deref()
                                .map(clean_engine_message)
                                .unwrap_or_else(|| "unknown error".to_string());
                            result.status = StepStatus::Failed;
                            result.error = Some(reason.clone());
                            if error.is_none() {
                                failure = Some(FailureKind::Check);
                                error = Some(
                                    CheckError::StepFailed {
                                        step: format!("{} ({})", index + 1, result.name),
                                        reason,
                                    }
                                    .to_string(),
                                );
                            }
                        }
                    }
                }
                ScriptEvent::Error { message } => {
                    if error.is_none() {
                        failure = Some(FailureKind::Setup);
                        error = Some(format!(
                            "Browser session failed: {}",
                            clean_engine_message(message)
                        ));
                    }
                }
                ScriptEvent::Ready | ScriptEvent::Done => {}
            }
        }

        if error.is_none() && run.timed_out {
            failure = Some(FailureKind::Timeout);
            error = Some(CheckError::Timeout(format!("scenario '{}'", scenario.name)).to_string());
        }

        let finished = run.events.iter().any(|e| matches!(e, ScriptEvent::Done));
        let all_passed = steps.iter().all(|s| s.status == StepStatus::Passed);
        if error.is_none() && (!finished || !all_passed || run.exit_code != Some(0)) {
            failure = Some(FailureKind::Setup);
            error = Some(format!(
                "Playwright script ended early (exit code {:?}): {}",
                run.exit_code,
                last_lines(&clean_engine_message(&run.stderr), 5)
            ));
        }

        let screenshots = steps
            .iter()
            .filter_map(|s| s.screenshot_path.clone())
            .collect();

        Self {
            name: scenario.name.clone(),
            success: error.is_none(),
            duration_ms: duration.as_millis() as u64,
            steps,
            screenshots,
            visual_diffs: Vec::new(),
            failure,
            error,
        }
    }
}

/// Result of running all scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: DateTime<Utc>,
    pub target_url: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }

    /// Exit code for the suite: 0 when every scenario passed, 2 when any
    /// scenario could not get a browser going, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else if self
            .results
            .iter()
            .any(|r| r.failure == Some(FailureKind::Setup))
        {
            2
        } else {
            1
        }
    }
}

/// Main scenario runner
pub struct ScenarioRunner {
    config: RunConfig,
    playwright: PlaywrightHandle,

    /// Dev server started for this run (if any)
    server: Option<ServerHandle>,
}

impl ScenarioRunner {
    pub fn new(config: RunConfig) -> CheckResult<Self> {
        config.validate()?;
        let playwright = PlaywrightHandle::new(config.clone())?;
        Ok(Self {
            config,
            playwright,
            server: None,
        })
    }

    /// Make sure the dashboard answers and Playwright is available.
    ///
    /// Fails with [`CheckError::ServerUnreachable`] before any browser is
    /// launched if nothing answers at the target URL.
    pub async fn prepare(&mut self) -> CheckResult<()> {
        let url = self.config.target_url.clone();

        match (&self.config.server.command, &self.server) {
            (Some(command), None) => {
                let handle = ServerHandle::spawn(&ServerConfig {
                    command: command.clone(),
                    cwd: self.config.server.cwd.clone(),
                    url: url.clone(),
                    startup_timeout: Duration::from_secs(self.config.server.startup_timeout_secs),
                })
                .await?;
                self.server = Some(handle);
            }
            _ => {
                server::wait_for_reachable(&url, Duration::from_secs(self.config.server.wait_secs))
                    .await?;
                info!("Target {} is reachable", url);
            }
        }

        self.playwright.check_installed().await?;
        std::fs::create_dir_all(&self.config.output_dir)?;
        Ok(())
    }

    /// Stop the dev server if this runner started one
    pub fn stop_server(&mut self) -> CheckResult<()> {
        if let Some(mut server) = self.server.take() {
            server.stop()?;
        }
        Ok(())
    }

    /// Prepare, run every scenario, then handle baselines and the report
    pub async fn run(&mut self, scenarios: &[Scenario]) -> CheckResult<SuiteResult> {
        self.prepare().await?;
        let result = self.run_scenarios(scenarios).await;
        self.stop_server()?;
        let result = result?;

        if self.config.visual.update_baselines {
            self.update_baselines(&result)?;
        }
        if let Some(path) = self.config.report.clone() {
            self.write_report(&result, &path)?;
        }

        Ok(result)
    }

    /// Run scenarios one after another. A failing scenario does not stop
    /// the ones after it.
    pub async fn run_scenarios(&self, scenarios: &[Scenario]) -> CheckResult<SuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} scenario(s) against {}", scenarios.len(), self.config.target_url);

        // Diffs from an earlier run go before any scenario writes new ones
        if let Some(baseline_dir) = self.comparing_against() {
            VisualTester::new(self.visual_config(baseline_dir, false))?.clean_diffs()?;
        }

        for scenario in scenarios {
            let result = self.run_scenario(scenario).await?;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        Ok(SuiteResult {
            started_at,
            target_url: self.config.target_url.clone(),
            total: scenarios.len(),
            passed,
            failed,
            duration_ms,
            results,
        })
    }

    /// Run a single scenario, stopping at its first failing step
    pub async fn run_scenario(&self, scenario: &Scenario) -> CheckResult<ScenarioResult> {
        let start = Instant::now();
        info!("Scenario: {}", scenario.name);
        if !scenario.description.is_empty() {
            debug!("  {}", scenario.description);
        }

        let screenshot_paths: Vec<Option<PathBuf>> = scenario
            .steps
            .iter()
            .map(|step| match step {
                Step::Screenshot { path, .. } => Some(self.playwright.screenshot_path(path)),
                _ => None,
            })
            .collect();

        for path in screenshot_paths.iter().flatten() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let total = scenario.steps.len();
        let run = self
            .playwright
            .run(scenario, |event| log_event(scenario, total, event))
            .await?;

        let mut result = ScenarioResult::from_run(scenario, &run, &screenshot_paths, start.elapsed());

        if result.success {
            if let Some(baseline_dir) = self.comparing_against() {
                self.compare_screenshots(baseline_dir, &mut result)?;
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    fn compare_screenshots(&self, baseline_dir: &Path, result: &mut ScenarioResult) -> CheckResult<()> {
        let tester = VisualTester::new(self.visual_config(baseline_dir, false))?;

        for shot in &result.screenshots {
            match tester.compare(shot) {
                Ok(diff) => {
                    if !diff.matches && result.error.is_none() {
                        result.failure = Some(FailureKind::Visual);
                        result.error = Some(
                            CheckError::ScreenshotMismatch {
                                name: diff.name.clone(),
                                diff_percent: diff.diff_percent,
                                threshold: self.config.visual.threshold,
                            }
                            .to_string(),
                        );
                    }
                    result.visual_diffs.push(diff);
                }
                Err(CheckError::BaselineNotFound(path)) => {
                    info!("No baseline at {} - create one with --update-baselines", path);
                }
                Err(e) => return Err(e),
            }
        }

        result.success = result.error.is_none();
        Ok(())
    }

    /// Baseline directory when this run compares rather than updates
    fn comparing_against(&self) -> Option<&Path> {
        match &self.config.visual.baseline_dir {
            Some(dir) if !self.config.visual.update_baselines => Some(dir.as_path()),
            _ => None,
        }
    }

    fn visual_config(&self, baseline_dir: &Path, update: bool) -> VisualConfig {
        VisualConfig {
            baseline_dir: baseline_dir.to_path_buf(),
            diff_dir: self.config.diff_dir(),
            threshold: self.config.visual.threshold,
            update,
        }
    }

    /// Copy screenshots from passing scenarios over their baselines
    pub fn update_baselines(&self, suite: &SuiteResult) -> CheckResult<()> {
        let Some(baseline_dir) = &self.config.visual.baseline_dir else {
            return Err(CheckError::Config("update_baselines requires a baseline_dir".into()));
        };
        let tester = VisualTester::new(self.visual_config(baseline_dir, true))?;

        for result in &suite.results {
            if !result.success {
                warn!("Not updating baselines from failed scenario '{}'", result.name);
                continue;
            }
            for shot in &result.screenshots {
                tester.update_baseline(shot)?;
            }
        }

        Ok(())
    }

    /// Write the suite result to a JSON file
    pub fn write_report(&self, suite: &SuiteResult, path: &Path) -> CheckResult<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(suite)?;
        std::fs::write(path, json)?;

        info!("Report written to: {}", path.display());
        Ok(path.to_path_buf())
    }
}

impl Drop for ScenarioRunner {
    fn drop(&mut self) {
        let _ = self.stop_server();
    }
}

fn log_event(scenario: &Scenario, total: usize, event: &ScriptEvent) {
    match event {
        ScriptEvent::Ready => debug!("Browser ready"),
        ScriptEvent::Step {
            index,
            status: EventStatus::Ok,
            duration_ms,
            ..
        } => {
            let name = scenario.steps.get(*index).map(Step::name).unwrap_or_default();
            info!("  ✓ [{}/{}] {} ({} ms)", index + 1, total, name, duration_ms);
        }
        ScriptEvent::Step {
            index,
            status: EventStatus::Failed,
            error,
            ..
        } => {
            let name = scenario.steps.get(*index).map(Step::name).unwrap_or_default();
            error!(
                "  ✗ [{}/{}] {} - {}",
                index + 1,
                total,
                name,
                error.as_deref().map(first_line).unwrap_or("unknown error")
            );
        }
        ScriptEvent::Error { message } => error!("  ✗ {}", first_line(message)),
        ScriptEvent::Done => debug!("Browser closed"),
    }
}

/// Strip ANSI color codes and surrounding whitespace from Playwright output
fn clean_engine_message(message: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let ansi = ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ANSI regex"));
    ansi.replace_all(message, "").trim().to_string()
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or(message)
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
