//! dashcheck - browser-driven visual verification for the stats dashboard
//!
//! This crate provides a Rust-controlled verification runner that:
//! - Checks that the dashboard answers before a browser is launched
//! - Optionally starts the dashboard's dev server and stops it afterwards
//! - Drives one headless Playwright session per scenario via Node.js
//! - Fails fast on the first landmark that does not reach its expected visibility
//! - Captures screenshots and optionally compares them with baselines
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   dashcheck (Rust binary)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ScenarioRunner                                             │
//! │    ├── prepare()        probe target / spawn dev server     │
//! │    ├── run_scenario()   PlaywrightHandle::run -> events     │
//! │    ├── compare()        VisualTester vs baselines           │
//! │    └── write_report()   JSON suite result                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (built-in or YAML)                                │
//! │    └── steps: [Step]                                        │
//! │          ├── navigate { url }                               │
//! │          ├── expect { locator, visible, timeout_ms? }       │
//! │          ├── scroll_into_view { locator }                   │
//! │          ├── click { locator, timeout_ms? }                 │
//! │          └── screenshot { path, full_page }                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod locator;
pub mod playwright;
pub mod runner;
pub mod server;
pub mod spec;
pub mod visual;

pub use config::RunConfig;
pub use error::{CheckError, CheckResult};
pub use locator::Locator;
pub use runner::{ScenarioResult, ScenarioRunner, SuiteResult};
pub use spec::{Scenario, Step};
