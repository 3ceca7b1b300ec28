//! Declarative verification scenarios
//!
//! A scenario is an ordered list of steps run once each, top to bottom.
//! The built-in [`Scenario::dashboard_tabs`] walks the stats dashboard tabs;
//! anything else comes from YAML files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CheckError, CheckResult};
use crate::locator::Locator;

/// A complete verification scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport size for the browser
    #[serde(default)]
    pub viewport: Viewport,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load a URL; relative URLs are resolved against the target URL
    Navigate {
        #[serde(default = "default_url")]
        url: String,
    },

    /// Wait until a landmark reaches the expected visibility
    Expect {
        locator: Locator,
        #[serde(default = "default_visible")]
        visible: bool,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Scroll a landmark into view if it is not already
    ScrollIntoView { locator: Locator },

    /// Click a landmark
    Click {
        locator: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Capture the page to a PNG file
    Screenshot {
        path: PathBuf,
        #[serde(default)]
        full_page: bool,
    },
}

fn default_url() -> String {
    "/".to_string()
}

fn default_visible() -> bool {
    true
}

impl Step {
    /// Short label used in logs and reports
    pub fn name(&self) -> String {
        match self {
            Step::Navigate { url } => format!("navigate:{}", url),
            Step::Expect {
                locator, visible, ..
            } => format!(
                "expect:{} {}",
                locator,
                if *visible { "visible" } else { "hidden" }
            ),
            Step::ScrollIntoView { locator } => format!("scroll_into_view:{}", locator),
            Step::Click { locator, .. } => format!("click:{}", locator),
            Step::Screenshot { path, .. } => format!("screenshot:{}", path.display()),
        }
    }
}

impl Scenario {
    /// Parse a scenario from a YAML string
    pub fn from_yaml(yaml: &str) -> CheckResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> CheckResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            CheckError::Yaml(inner) => {
                CheckError::SpecParse(format!("{}: {}", path.display(), inner))
            }
            CheckError::SpecParse(msg) => {
                CheckError::SpecParse(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Load all scenarios under a directory, sorted by file path
    pub fn load_all(dir: &Path) -> CheckResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        Ok(scenarios)
    }

    /// Load a single file, or every scenario in a directory
    pub fn load_path(path: &Path) -> CheckResult<Vec<Self>> {
        if path.is_dir() {
            Self::load_all(path)
        } else {
            Ok(vec![Self::from_file(path)?])
        }
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    fn validate(&self) -> CheckResult<()> {
        if self.name.trim().is_empty() {
            return Err(CheckError::SpecParse("scenario name is empty".into()));
        }
        if self.steps.is_empty() {
            return Err(CheckError::SpecParse(format!(
                "scenario '{}' has no steps",
                self.name
            )));
        }

        for (i, step) in self.steps.iter().enumerate() {
            match step {
                Step::Screenshot { path, .. } if path.as_os_str().is_empty() => {
                    return Err(CheckError::SpecParse(format!(
                        "step {} of '{}': screenshot path is empty",
                        i + 1,
                        self.name
                    )));
                }
                Step::Expect {
                    timeout_ms: Some(0),
                    ..
                }
                | Step::Click {
                    timeout_ms: Some(0),
                    ..
                } => {
                    return Err(CheckError::SpecParse(format!(
                        "step {} of '{}': timeout_ms must be greater than zero",
                        i + 1,
                        self.name
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Screenshot paths in the order the steps will write them
    pub fn screenshot_paths(&self) -> Vec<&Path> {
        self.steps
            .iter()
            .filter_map(|step| match step {
                Step::Screenshot { path, .. } => Some(path.as_path()),
                _ => None,
            })
            .collect()
    }

    /// The stats dashboard tab walk.
    ///
    /// Overview must show `#stats` and must not show the removed
    /// "Now Playing" card. Each remaining tab is clicked and one landmark
    /// from its panel must appear before the capture.
    pub fn dashboard_tabs() -> Self {
        let mut steps = vec![
            Step::Navigate { url: default_url() },
            Step::Expect {
                locator: Locator::css("#stats"),
                visible: true,
                timeout_ms: None,
            },
            Step::ScrollIntoView {
                locator: Locator::css("#stats"),
            },
            Step::Expect {
                locator: Locator::text("Now Playing"),
                visible: false,
                timeout_ms: None,
            },
            Step::Screenshot {
                path: PathBuf::from("overview_red.png"),
                full_page: false,
            },
        ];

        for (tab, landmark, shot) in [
            ("Coding", "6-Month Trend", "coding_red.png"),
            ("Fitness", "Monthly Progress", "fitness_red.png"),
            ("Learning", "Card Types", "learning_red.png"),
        ] {
            steps.push(Step::Click {
                locator: Locator::button(tab),
                timeout_ms: None,
            });
            steps.push(Step::Expect {
                locator: Locator::text(landmark),
                visible: true,
                timeout_ms: None,
            });
            steps.push(Step::Screenshot {
                path: PathBuf::from(shot),
                full_page: false,
            });
        }

        Self {
            name: "dashboard-tabs".to_string(),
            description: "Overview, Coding, Fitness and Learning tabs of the stats dashboard"
                .to_string(),
            tags: vec!["dashboard".to_string(), "smoke".to_string()],
            viewport: Viewport::default(),
            steps,
        }
    }
}
