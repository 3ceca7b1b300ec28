//! Target server handling - reachability probes and an optional managed dev server

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{CheckError, CheckResult};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Send one GET to the target. Any HTTP response counts as reachable.
pub async fn probe(client: &reqwest::Client, url: &str) -> CheckResult<()> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        warn!("{} answered with {}", url, resp.status());
    }
    Ok(())
}

/// Probe until the target answers or `wait` runs out. A zero `wait` probes once.
pub async fn wait_for_reachable(url: &str, wait: Duration) -> CheckResult<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let start = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match probe(&client, url).await {
            Ok(()) => {
                debug!("{} reachable after {} attempt(s)", url, attempts);
                return Ok(());
            }
            Err(CheckError::Http(e)) => {
                if attempts == 1 && !wait.is_zero() {
                    info!("Waiting for {} ...", url);
                }
                // Connection refused is expected while a server is starting
                if !e.is_connect() {
                    warn!("Probe error: {}", e);
                }
            }
            Err(e) => return Err(e),
        }

        if start.elapsed() >= wait {
            break;
        }
        sleep(POLL_INTERVAL).await;
    }

    Err(CheckError::ServerUnreachable {
        url: url.to_string(),
        attempts,
    })
}

/// Handle to a dev server started for the run
pub struct ServerHandle {
    child: Child,
    pub url: String,
}

impl ServerHandle {
    /// Start `config.command` under `sh -c` and wait until `url` answers
    pub async fn spawn(config: &ServerConfig) -> CheckResult<Self> {
        info!("Starting dashboard server: {}", config.command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&config.command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        // Own process group, so npm and its children go down together
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            CheckError::ServerStartup(format!("Failed to spawn '{}': {}", config.command, e))
        })?;

        let mut handle = ServerHandle {
            child,
            url: config.url.clone(),
        };

        match wait_for_reachable(&config.url, config.startup_timeout).await {
            Ok(()) => {}
            Err(CheckError::ServerUnreachable { attempts, .. }) => {
                if let Ok(Some(status)) = handle.child.try_wait() {
                    return Err(CheckError::ServerStartup(format!(
                        "'{}' exited early with {}",
                        config.command, status
                    )));
                }
                return Err(CheckError::ServerStartup(format!(
                    "'{}' did not answer at {} after {} attempt(s)",
                    config.command, config.url, attempts
                )));
            }
            Err(e) => return Err(e),
        }

        // A server that was already running elsewhere would also answer
        if let Ok(Some(status)) = handle.child.try_wait() {
            warn!(
                "'{}' exited with {} but {} is reachable; using the existing server",
                config.command, status, config.url
            );
        }

        info!("Server is reachable at {}", handle.url);
        Ok(handle)
    }

    /// Stop the server
    pub fn stop(&mut self) -> CheckResult<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        info!("Stopping dashboard server (pid: {})", self.child.id());

        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(self.child.id() as i32);
            if killpg(pgid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();

        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Configuration for starting a server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub command: String,
    pub cwd: Option<PathBuf>,
    pub url: String,
    pub startup_timeout: Duration,
}
