//! Playwright browser automation
//!
//! A scenario is rendered into a single Node.js script that drives one
//! browser session from launch to close. The script reports progress on
//! stdout, one JSON object per line:
//!
//! ```text
//! {"event":"ready"}
//! {"event":"step","index":0,"status":"ok","duration_ms":412}
//! {"event":"step","index":1,"status":"failed","duration_ms":5003,"error":"..."}
//! {"event":"error","message":"..."}      launch or setup failure
//! {"event":"done"}
//! ```
//!
//! The first failing step stops the script. The browser is closed in a
//! `finally` block, so the session is released on every exit path.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use crate::config::RunConfig;
use crate::error::{CheckError, CheckResult};
use crate::locator::Locator;
use crate::spec::{Scenario, Step};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Resolves `playwright` from the working directory first, then from the
/// normal lookup path (including NODE_PATH).
const LOADER_JS: &str = r#"function loadPlaywright() {
  try {
    return require(require.resolve('playwright', { paths: [process.cwd()] }));
  } catch (_) {
    return require('playwright');
  }
}"#;

/// Progress event printed by the generated script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    Ready,
    Step {
        index: usize,
        status: EventStatus,
        #[serde(default)]
        duration_ms: u64,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        message: String,
    },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ok,
    Failed,
}

/// Parse one stdout line. Lines that are not events (console noise from the
/// page or from Playwright) yield `None`.
pub fn parse_event(line: &str) -> Option<ScriptEvent> {
    let line = line.trim();
    if !line.starts_with('{') {
        return None;
    }
    serde_json::from_str(line).ok()
}

/// Everything observed while the script ran
#[derive(Debug, Clone, Default)]
pub struct ScriptRun {
    pub events: Vec<ScriptEvent>,
    pub exit_code: Option<i32>,
    pub stderr: String,
    pub timed_out: bool,
}

/// Playwright browser handle
pub struct PlaywrightHandle {
    config: RunConfig,

    /// Node.js executable
    node: PathBuf,

    /// Directory relative screenshot paths are made absolute against
    working_dir: PathBuf,
}

impl PlaywrightHandle {
    pub fn new(config: RunConfig) -> CheckResult<Self> {
        let node = config.node.clone();
        let working_dir = std::env::current_dir()?;

        Ok(Self {
            config,
            node,
            working_dir,
        })
    }

    /// Check that node runs and can load the playwright package
    pub async fn check_installed(&self) -> CheckResult<()> {
        let probe = format!("{}\nloadPlaywright();", LOADER_JS);
        let status = TokioCommand::new(&self.node)
            .arg("-e")
            .arg(probe)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                debug!("playwright probe exited with {}", status);
                Err(CheckError::PlaywrightNotFound)
            }
            Err(e) => {
                debug!("could not run {}: {}", self.node.display(), e);
                Err(CheckError::PlaywrightNotFound)
            }
        }
    }

    /// Absolute location a screenshot step writes to
    pub fn screenshot_path(&self, path: &Path) -> PathBuf {
        let path = self.config.artifact_path(path);
        if path.is_absolute() {
            path
        } else {
            self.working_dir.join(path)
        }
    }

    /// Build the Playwright script for a scenario
    pub fn build_script(&self, scenario: &Scenario) -> CheckResult<String> {
        let viewport = self.config.viewport.unwrap_or(scenario.viewport);
        let mut script = String::new();

        script.push_str(&format!(
            r#"// Generated for scenario {name}
{loader}

const emit = (event) => console.log(JSON.stringify(event));
class StepFailure extends Error {{}}

async function step(index, action) {{
  const started = Date.now();
  try {{
    await action();
  }} catch (error) {{
    emit({{ event: 'step', index, status: 'failed', duration_ms: Date.now() - started, error: String(error && error.message ? error.message : error) }});
    throw new StepFailure();
  }}
  emit({{ event: 'step', index, status: 'ok', duration_ms: Date.now() - started }});
}}

(async () => {{
  let browser;
  try {{
    const playwright = loadPlaywright();
    browser = await playwright.{browser}.launch({{ headless: {headless} }});
    const context = await browser.newContext({{
      viewport: {{ width: {width}, height: {height} }}
    }});
    const page = await context.newPage();
    emit({{ event: 'ready' }});
"#,
            name = js_string(&scenario.name),
            loader = LOADER_JS,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = viewport.width,
            height = viewport.height,
        ));

        for (i, step) in scenario.steps.iter().enumerate() {
            script.push_str(&format!("\n    // {}\n", step.name().replace('\n', " ")));
            script.push_str(&format!(
                "    await step({}, async () => {{\n      {}\n    }});\n",
                i,
                self.step_to_js(step)?
            ));
        }

        script.push_str(
            r#"
    emit({ event: 'done' });
  } catch (error) {
    if (!(error instanceof StepFailure)) {
      emit({ event: 'error', message: String(error && error.message ? error.message : error) });
    }
    process.exitCode = 1;
  } finally {
    if (browser) {
      await browser.close().catch(() => {});
    }
  }
})();
"#,
        );

        Ok(script)
    }

    /// Convert a step to JavaScript code
    fn step_to_js(&self, step: &Step) -> CheckResult<String> {
        let default_timeout = self.config.timeout_ms;

        let js = match step {
            Step::Navigate { url } => {
                let url = self.config.resolve_url(url)?;
                format!("await page.goto({});", js_string(&url))
            }
            Step::Expect {
                locator,
                visible,
                timeout_ms,
            } => format!(
                "await {}.waitFor({{ state: '{}', timeout: {} }});",
                locator_js(locator),
                if *visible { "visible" } else { "hidden" },
                timeout_ms.unwrap_or(default_timeout)
            ),
            // Actions keep Playwright's own timeout unless the step sets one
            Step::ScrollIntoView { locator } => {
                format!("await {}.scrollIntoViewIfNeeded();", locator_js(locator))
            }
            Step::Click {
                locator,
                timeout_ms: None,
            } => format!("await {}.click();", locator_js(locator)),
            Step::Click {
                locator,
                timeout_ms: Some(ms),
            } => format!("await {}.click({{ timeout: {} }});", locator_js(locator), ms),
            Step::Screenshot { path, full_page } => {
                let path = self.screenshot_path(path);
                format!(
                    "await page.screenshot({{ path: {}, fullPage: {} }});",
                    js_string(&path.to_string_lossy()),
                    full_page
                )
            }
        };

        Ok(js)
    }

    /// Run a scenario's script to completion, handing each event to
    /// `on_event` as it arrives.
    pub async fn run<F>(&self, scenario: &Scenario, mut on_event: F) -> CheckResult<ScriptRun>
    where
        F: FnMut(&ScriptEvent),
    {
        let script = self.build_script(scenario)?;

        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("scenario.js");
        std::fs::write(&script_path, &script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let mut child = TokioCommand::new(&self.node)
            .arg(&script_path)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CheckError::Playwright(format!("Failed to start {}: {}", self.node.display(), e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CheckError::Playwright("node stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| CheckError::Playwright("node stderr not captured".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut events = Vec::new();
        let mut timed_out = false;
        let mut lines = BufReader::new(stdout).lines();

        let read_all = async {
            while let Some(line) = lines.next_line().await? {
                match parse_event(&line) {
                    Some(event) => {
                        on_event(&event);
                        events.push(event);
                    }
                    None => debug!("[node] {}", line),
                }
            }
            Ok::<_, std::io::Error>(())
        };

        match tokio::time::timeout(self.config.scenario_timeout(), read_all).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "Scenario '{}' exceeded {}s, killing browser",
                    scenario.name, self.config.scenario_timeout_secs
                );
                timed_out = true;
                let _ = child.kill().await;
            }
        }

        let status = child.wait().await?;

        // Grandchildren can keep stderr open after a kill
        let stderr = match tokio::time::timeout(Duration::from_secs(2), stderr_task).await {
            Ok(Ok(text)) => text,
            _ => String::new(),
        };

        Ok(ScriptRun {
            events,
            exit_code: status.code(),
            stderr,
            timed_out,
        })
    }
}

/// Render a locator as a Playwright locator expression on `page`
pub fn locator_js(locator: &Locator) -> String {
    match locator {
        Locator::Css(selector) => format!("page.locator({})", js_string(selector)),
        Locator::Text { text, exact: false } => format!("page.getByText({})", js_string(text)),
        Locator::Text { text, exact: true } => {
            format!("page.getByText({}, {{ exact: true }})", js_string(text))
        }
        Locator::Role { role, name: None } => format!("page.getByRole({})", js_string(role)),
        Locator::Role {
            role,
            name: Some(name),
        } => format!(
            "page.getByRole({}, {{ name: {} }})",
            js_string(role),
            js_string(name)
        ),
    }
}

/// Quote a string as a JavaScript literal
fn js_string(value: &str) -> String {
    // JSON strings are valid JS string literals except for U+2028/U+2029
    serde_json::Value::String(value.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> PlaywrightHandle {
        PlaywrightHandle {
            config: RunConfig::default(),
            node: PathBuf::from("node"),
            working_dir: PathBuf::from("/work"),
        }
    }

    #[test]
    fn test_locator_js() {
        assert_eq!(
            locator_js(&Locator::css("#stats")),
            r##"page.locator("#stats")"##
        );
        assert_eq!(
            locator_js(&Locator::text("Now Playing")),
            r#"page.getByText("Now Playing")"#
        );
        assert_eq!(
            locator_js(&Locator::exact_text("Now Playing")),
            r#"page.getByText("Now Playing", { exact: true })"#
        );
        assert_eq!(
            locator_js(&Locator::button("Coding")),
            r#"page.getByRole("button", { name: "Coding" })"#
        );
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"it's "x""#), r#""it's \"x\"""#);
        assert_eq!(js_string("a\u{2028}b"), r#""a\u2028b""#);
    }

    #[test]
    fn test_parse_events() {
        assert_eq!(parse_event(r#"{"event":"ready"}"#), Some(ScriptEvent::Ready));
        assert_eq!(
            parse_event(r#"{"event":"step","index":3,"status":"failed","duration_ms":5001,"error":"Timeout 5000ms exceeded."}"#),
            Some(ScriptEvent::Step {
                index: 3,
                status: EventStatus::Failed,
                duration_ms: 5001,
                error: Some("Timeout 5000ms exceeded.".into()),
            })
        );
        assert_eq!(parse_event("Download progress 42%"), None);
        assert_eq!(parse_event(r#"{"unrelated":true}"#), None);
    }

    #[test]
    fn test_dashboard_script_order() {
        let script = handle().build_script(&Scenario::dashboard_tabs()).unwrap();

        let expected_in_order = [
            "playwright.chromium.launch({ headless: true })",
            r#"await page.goto("http://localhost:3000/");"#,
            r##"await page.locator("#stats").waitFor({ state: 'visible', timeout: 5000 });"##,
            r##"await page.locator("#stats").scrollIntoViewIfNeeded();"##,
            r#"await page.getByText("Now Playing").waitFor({ state: 'hidden', timeout: 5000 });"#,
            r#"path: "/work/jules-scratch/verification/overview_red.png""#,
            r#"await page.getByRole("button", { name: "Coding" }).click();"#,
            r#"await page.getByText("6-Month Trend").waitFor({ state: 'visible', timeout: 5000 });"#,
            r#"path: "/work/jules-scratch/verification/coding_red.png""#,
            r#"await page.getByRole("button", { name: "Fitness" }).click();"#,
            r#"await page.getByText("Monthly Progress").waitFor({ state: 'visible', timeout: 5000 });"#,
            r#"path: "/work/jules-scratch/verification/fitness_red.png""#,
            r#"await page.getByRole("button", { name: "Learning" }).click();"#,
            r#"await page.getByText("Card Types").waitFor({ state: 'visible', timeout: 5000 });"#,
            r#"path: "/work/jules-scratch/verification/learning_red.png""#,
            "emit({ event: 'done' });",
            "await browser.close()",
        ];

        let mut cursor = 0;
        for needle in expected_in_order {
            let found = script[cursor..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing or out of order: {needle}"));
            cursor += found + needle.len();
        }
    }

    #[test]
    fn test_script_respects_config() {
        let mut config = RunConfig::default();
        config.target_url = "http://127.0.0.1:4000".into();
        config.timeout_ms = 750;
        config.browser = Browser::Firefox;
        config.headless = false;
        config.viewport = Some(crate::spec::Viewport {
            width: 1920,
            height: 1080,
        });
        let handle = PlaywrightHandle {
            config,
            node: PathBuf::from("node"),
            working_dir: PathBuf::from("/work"),
        };

        let script = handle.build_script(&Scenario::dashboard_tabs()).unwrap();
        assert!(script.contains("playwright.firefox.launch({ headless: false })"));
        assert!(script.contains("viewport: { width: 1920, height: 1080 }"));
        assert!(script.contains(r#"page.goto("http://127.0.0.1:4000/")"#));
        assert!(script.contains("timeout: 750"));
        assert!(!script.contains("timeout: 5000"));
    }

    #[test]
    fn test_step_timeout_override() {
        let step = Step::Expect {
            locator: Locator::text("Card Types"),
            visible: true,
            timeout_ms: Some(12_000),
        };
        let js = handle().step_to_js(&step).unwrap();
        assert!(js.ends_with("waitFor({ state: 'visible', timeout: 12000 });"));
    }

    #[test]
    fn test_click_timeout_only_when_set() {
        let button = Locator::button("Coding");
        let default = handle()
            .step_to_js(&Step::Click {
                locator: button.clone(),
                timeout_ms: None,
            })
            .unwrap();
        assert!(default.ends_with(".click();"));

        let explicit = handle()
            .step_to_js(&Step::Click {
                locator: button,
                timeout_ms: Some(2_000),
            })
            .unwrap();
        assert!(explicit.ends_with(".click({ timeout: 2000 });"));
    }
}
