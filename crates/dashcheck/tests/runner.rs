//! Runner tests against a stand-in `node` that replays Playwright events.
//!
//! The stand-in answers the install probe, records each script it is given,
//! and prints a canned event stream. In `pass` mode it also copies a PNG to
//! every screenshot path found in the script, like `page.screenshot` would.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use dashcheck::error::CheckError;
use dashcheck::runner::{FailureKind, StepStatus};
use dashcheck::{RunConfig, Scenario, ScenarioRunner, SuiteResult};
use image::{Rgba, RgbaImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

enum Mode {
    Pass,
    FailAt(usize),
    Hang,
}

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn marker(&self) -> PathBuf {
        self.path("scripts-run.log")
    }

    fn fake_node(&self, mode: Mode) -> PathBuf {
        let png = self.path("fixture.png");
        RgbaImage::from_pixel(8, 8, Rgba([220, 38, 38, 255]))
            .save(&png)
            .unwrap();

        let mut events = String::from("{\"event\":\"ready\"}\n");
        let body = match mode {
            // One ok event per `await step(` in the script, whatever the scenario
            Mode::Pass => format!(
                "grep -o 'path: \"[^\"]*\"' \"$1\" | sed 's/^path: \"//; s/\"$//' | while read -r p; do cp '{}' \"$p\"; done\n\
                 cat <<'EOF'\n{}EOF\n\
                 n=$(grep -c 'await step(' \"$1\")\n\
                 i=0\n\
                 while [ $i -lt $n ]; do echo \"{{\\\"event\\\":\\\"step\\\",\\\"index\\\":$i,\\\"status\\\":\\\"ok\\\",\\\"duration_ms\\\":3}}\"; i=$((i+1)); done\n\
                 echo '{{\"event\":\"done\"}}'\n\
                 exit 0\n",
                png.display(),
                events
            ),
            Mode::FailAt(failed) => {
                for i in 0..failed {
                    events.push_str(&format!(
                        "{{\"event\":\"step\",\"index\":{},\"status\":\"ok\",\"duration_ms\":3}}\n",
                        i
                    ));
                }
                events.push_str(&format!(
                    "{{\"event\":\"step\",\"index\":{},\"status\":\"failed\",\"duration_ms\":5001,\"error\":\"locator.waitFor: Timeout 5000ms exceeded.\"}}\n",
                    failed
                ));
                format!("cat <<'EOF'\n{}EOF\nexit 1\n", events)
            }
            Mode::Hang => format!("cat <<'EOF'\n{}EOF\nexec sleep 30\n", events),
        };

        let script = format!(
            "#!/bin/sh\nif [ \"$1\" = \"-e\" ]; then exit 0; fi\necho \"$1\" >> '{}'\n{}",
            self.marker().display(),
            body
        );

        let path = self.path("fake-node");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn config(&self, url: String, node: PathBuf) -> RunConfig {
        RunConfig {
            target_url: url,
            output_dir: self.path("verification"),
            node,
            ..RunConfig::default()
        }
    }
}

/// Minimal HTTP server that answers every request with 200
async fn dashboard() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
                    .await;
            });
        }
    });
    url
}

async fn run(config: RunConfig) -> Result<SuiteResult, CheckError> {
    let mut runner = ScenarioRunner::new(config)?;
    runner.run(&[Scenario::dashboard_tabs()]).await
}

/// Navigate, then capture `<name>.png`
fn shot_scenario(name: &str) -> Scenario {
    Scenario::from_yaml(&format!(
        "name: {name}\nsteps:\n  - action: navigate\n  - action: screenshot\n    path: {name}.png\n"
    ))
    .unwrap()
}

fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect()
}

#[tokio::test]
async fn test_passing_run_writes_four_screenshots_in_order() {
    let fx = Fixture::new();
    let mut config = fx.config(dashboard().await, fx.fake_node(Mode::Pass));
    config.report = Some(fx.path("report/run.json"));

    let suite = run(config).await.unwrap();

    assert_eq!(suite.exit_code(), 0);
    assert_eq!(suite.passed, 1);
    let result = &suite.results[0];
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Passed));
    assert_eq!(
        file_names(&result.screenshots),
        ["overview_red.png", "coding_red.png", "fitness_red.png", "learning_red.png"]
    );
    for shot in &result.screenshots {
        assert!(shot.starts_with(fx.path("verification")));
        assert!(shot.exists(), "missing {}", shot.display());
    }

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(fx.path("report/run.json")).unwrap())
            .unwrap();
    assert_eq!(report["passed"], 1);
    assert_eq!(report["results"][0]["name"], "dashboard-tabs");
}

#[tokio::test]
async fn test_second_run_overwrites_same_paths() {
    let fx = Fixture::new();
    let url = dashboard().await;
    let node = fx.fake_node(Mode::Pass);

    let first = run(fx.config(url.clone(), node.clone())).await.unwrap();
    let second = run(fx.config(url, node)).await.unwrap();

    assert_eq!(first.results[0].screenshots, second.results[0].screenshots);
    let pngs = std::fs::read_dir(fx.path("verification"))
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .path()
                .extension()
                .map(|x| x == "png")
                .unwrap_or(false)
        })
        .count();
    assert_eq!(pngs, 4);
}

#[tokio::test]
async fn test_now_playing_regression_fails_fast() {
    let fx = Fixture::new();
    let config = fx.config(dashboard().await, fx.fake_node(Mode::FailAt(3)));

    let suite = run(config).await.unwrap();

    assert_eq!(suite.exit_code(), 1);
    let result = &suite.results[0];
    assert_eq!(result.failure, Some(FailureKind::Check));
    assert_eq!(result.steps[3].name, "expect:text=Now Playing hidden");
    assert_eq!(result.steps[3].status, StepStatus::Failed);
    assert!(result.steps[4..].iter().all(|s| s.status == StepStatus::NotRun));
    assert!(result.screenshots.is_empty());
    assert!(!fx.path("verification/coding_red.png").exists());
}

#[tokio::test]
async fn test_unreachable_server_fails_before_browser() {
    let fx = Fixture::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = run(fx.config(url, fx.fake_node(Mode::Pass)))
        .await
        .unwrap_err();

    assert!(matches!(err, CheckError::ServerUnreachable { .. }));
    assert_eq!(err.exit_code(), 3);
    assert!(!fx.marker().exists());
}

#[tokio::test]
async fn test_hung_browser_is_killed_at_scenario_timeout() {
    let fx = Fixture::new();
    let mut config = fx.config(dashboard().await, fx.fake_node(Mode::Hang));
    config.scenario_timeout_secs = 1;

    let suite = run(config).await.unwrap();

    assert_eq!(suite.results[0].failure, Some(FailureKind::Timeout));
    assert_eq!(suite.exit_code(), 1);
}

#[tokio::test]
async fn test_update_then_compare_baselines() {
    let fx = Fixture::new();
    let url = dashboard().await;
    let node = fx.fake_node(Mode::Pass);
    let baselines = fx.path("baselines");

    let mut update = fx.config(url.clone(), node.clone());
    update.visual.baseline_dir = Some(baselines.clone());
    update.visual.update_baselines = true;
    run(update).await.unwrap();
    assert!(baselines.join("learning_red.png").exists());

    let mut compare = fx.config(url, node);
    compare.visual.baseline_dir = Some(baselines);
    let suite = run(compare).await.unwrap();

    let result = &suite.results[0];
    assert!(result.success);
    assert_eq!(result.visual_diffs.len(), 4);
    assert!(result.visual_diffs.iter().all(|d| d.matches));
}

#[test]
fn test_invalid_config_rejected_up_front() {
    let config = RunConfig {
        target_url: "localhost:3000".into(),
        ..RunConfig::default()
    };
    let err = ScenarioRunner::new(config).err().unwrap();
    assert!(matches!(err, CheckError::Config(_)));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_diff_image_survives_later_scenarios() {
    let fx = Fixture::new();
    let node = fx.fake_node(Mode::Pass);
    let baselines = fx.path("baselines");
    std::fs::create_dir_all(&baselines).unwrap();
    RgbaImage::from_pixel(8, 8, Rgba([30, 30, 200, 255]))
        .save(baselines.join("a.png"))
        .unwrap();
    std::fs::copy(fx.path("fixture.png"), baselines.join("b.png")).unwrap();

    let stale = fx.path("verification/diffs/old-diff.png");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, b"stale").unwrap();

    let mut config = fx.config(dashboard().await, node);
    config.visual.baseline_dir = Some(baselines);
    let mut runner = ScenarioRunner::new(config).unwrap();
    let suite = runner
        .run(&[shot_scenario("a"), shot_scenario("b")])
        .await
        .unwrap();

    let a = &suite.results[0];
    assert_eq!(a.failure, Some(FailureKind::Visual));
    let diff_image = a.visual_diffs[0].diff_image_path.clone().unwrap();
    assert_eq!(diff_image, fx.path("verification/diffs/a-diff.png"));
    assert!(diff_image.exists());

    assert!(suite.results[1].success);
    assert!(suite.results[1].visual_diffs[0].matches);
    assert!(!stale.exists());
    assert_eq!(suite.exit_code(), 1);
}

#[tokio::test]
async fn test_missing_baseline_dir_is_config_error() {
    let fx = Fixture::new();
    let mut config = fx.config(dashboard().await, fx.fake_node(Mode::Pass));
    config.visual.baseline_dir = Some(fx.path("baselnes"));

    let err = run(config).await.unwrap_err();

    assert!(matches!(err, CheckError::Config(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(!fx.path("baselnes").exists());
    assert!(!fx.marker().exists());
}
