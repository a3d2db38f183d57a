//! Controller for one external storage-network daemon process

use futures::TryStreamExt;
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use parking_lot::Mutex as PlMutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{
    env, io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, OnceLock},
    time::Duration,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpListener,
    process::{Child, Command},
    sync::Mutex,
    time::sleep,
};
use tokio_util::io::StreamReader;
use tracing::{debug, trace, warn};

mod ops;

/// Attempts of the readiness probe, at [`STARTUP_POLL`] granularity.
const STARTUP_ATTEMPTS: usize = 100;
/// Poll granularity of the readiness probe.
const STARTUP_POLL: Duration = Duration::from_millis(100);
/// Per-request timeout of the readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// How long a daemon gets to exit after SIGTERM before the hard kill.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors produced while driving a daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to set up or spawn the daemon: {0}")]
    Spawn(#[from] io::Error),
    #[error("daemon did not come online within 10s")]
    StartupTimeout,
    #[error("command {args:?} failed (code {code:?}): {stderr}")]
    Command { args: Vec<String>, code: Option<i32>, stderr: String },
    #[error("peers failed to see each other: {0}")]
    Connectivity(String),
    #[error("daemon returned an empty address")]
    EmptyAddress,
    #[error("unexpected daemon output: {0}")]
    Parse(String),
    #[error("control endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("operation cancelled")]
    Cancelled,
    #[error("no daemon binary: set NETSIM_NODE_BIN or put `netsim-node` on PATH")]
    MissingBinary,
}

static NODE_BINARY: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Resolves the daemon binary, once per process.
fn node_binary() -> Result<&'static Path, DaemonError> {
    NODE_BINARY
        .get_or_init(|| {
            if let Some(bin) = env::var_os("NETSIM_NODE_BIN") {
                return Some(PathBuf::from(bin));
            }
            let paths = env::var_os("PATH")?;
            env::split_paths(&paths).map(|dir| dir.join("netsim-node")).find(|bin| bin.is_file())
        })
        .as_deref()
        .ok_or(DaemonError::MissingBinary)
}

/// Captured output of one daemon CLI invocation.
#[derive(Clone, Debug, Default)]
pub struct Output {
    /// The arguments the command ran with, api flags excluded
    pub args: Vec<String>,
    /// Unix style exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

// === impl Output ===

impl Output {
    /// The stdout payload with surrounding newlines stripped.
    pub fn trimmed(&self) -> &str {
        self.stdout.trim_matches('\n')
    }

    /// Parses stdout as a sequence of newline-delimited JSON records.
    pub fn records<T: DeserializeOwned>(&self) -> Result<Vec<T>, DaemonError> {
        self.stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|err| DaemonError::Parse(format!("{err}: {line}")))
            })
            .collect()
    }

    /// A command failed if it exited non-zero or complained on stderr.
    pub fn failed(&self) -> bool {
        if self.code != Some(0) {
            return true;
        }
        ["CRITICAL", "ERROR", "WARNING"].iter().any(|marker| self.stderr.contains(marker))
    }
}

/// A handle to one running daemon process.
///
/// The daemon is driven two ways: one-shot CLI invocations routed to its
/// command api address, and plain HTTP against the same address for the
/// readiness probe and the event log tail. The identity, wallet and market
/// operations live in the `ops` sibling module.
pub struct Daemon {
    cmd_port: u16,
    swarm_addr: String,
    repo_dir: PathBuf,
    process: Mutex<Option<Child>>,
    /// daemon process stderr, drained continuously for post-mortems
    stderr: Arc<PlMutex<Vec<u8>>>,
    http: reqwest::Client,
}

// === impl Daemon ===

impl Daemon {
    /// Initializes a fresh repo under `repo_dir` and starts the daemon.
    ///
    /// The returned daemon has a live process but is not necessarily ready;
    /// call [`wait_for_api`](Self::wait_for_api) before issuing commands.
    pub async fn start(repo_dir: PathBuf) -> Result<Self, DaemonError> {
        let bin = node_binary()?;
        let cmd_port = free_port().await?;
        let swarm_port = free_port().await?;
        let swarm_addr = format!("/ip4/127.0.0.1/tcp/{swarm_port}");

        tokio::fs::create_dir_all(&repo_dir).await?;

        // a fresh repo must be initialised before the daemon can serve it
        let init = Command::new(bin)
            .arg("init")
            .arg(format!("--repodir={}", repo_dir.display()))
            .output()
            .await?;
        if !init.status.success() {
            return Err(DaemonError::Command {
                args: vec!["init".to_string()],
                code: init.status.code(),
                stderr: String::from_utf8_lossy(&init.stderr).into_owned(),
            });
        }

        trace!(target: "daemon", repo = %repo_dir.display(), port = cmd_port, "starting daemon");
        let mut child = Command::new(bin)
            .arg("daemon")
            .arg(format!("--repodir={}", repo_dir.display()))
            .arg(format!("--cmdapiaddr=:{cmd_port}"))
            .arg(format!("--swarmlisten={swarm_addr}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = drain(child.stderr.take());

        Ok(Self {
            cmd_port,
            swarm_addr,
            repo_dir,
            process: Mutex::new(Some(child)),
            stderr,
            http: reqwest::Client::new(),
        })
    }

    /// The daemon's command api port on localhost.
    pub fn cmd_port(&self) -> u16 {
        self.cmd_port
    }

    /// The swarm address the daemon listens on.
    pub fn swarm_addr(&self) -> &str {
        &self.swarm_addr
    }

    /// The daemon's working directory.
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn api_url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}/api/{path}", self.cmd_port)
    }

    /// Polls the identity endpoint until the daemon answers with a non-empty
    /// id, for at most ten seconds.
    pub async fn wait_for_api(&self) -> Result<(), DaemonError> {
        for attempt in 0..STARTUP_ATTEMPTS {
            if attempt > 0 {
                sleep(STARTUP_POLL).await;
            }
            if self.probe_api().await {
                return Ok(());
            }
        }
        Err(DaemonError::StartupTimeout)
    }

    async fn probe_api(&self) -> bool {
        let request = self.http.get(self.api_url("id")).timeout(PROBE_TIMEOUT);
        let Ok(resp) = request.send().await else { return false };
        let Ok(doc) = resp.json::<Value>().await else { return false };
        doc.get("ID").and_then(Value::as_str).is_some_and(|id| !id.is_empty())
    }

    /// Runs one CLI command against this daemon and captures its output.
    ///
    /// Stdout and stderr are consumed to the end from their own tasks before
    /// joining on the exit status, so a chatty command cannot wedge the
    /// invocation. Any [`Output::failed`] outcome is returned as an error.
    pub async fn run(&self, args: &[&str]) -> Result<Output, DaemonError> {
        let bin = node_binary()?;
        trace!(target: "daemon", ?args, port = self.cmd_port, "run");

        let mut child = Command::new(bin)
            .args(args)
            .arg(format!("--repodir={}", self.repo_dir.display()))
            .arg(format!("--cmdapiaddr=:{}", self.cmd_port))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // a cancelled invocation must not leave the command running
            .kill_on_drop(true)
            .spawn()?;

        let stdout = tokio::spawn(read_to_end(child.stdout.take()));
        let stderr = tokio::spawn(read_to_end(child.stderr.take()));
        let status = child.wait().await?;

        let out = Output {
            args: args.iter().map(|arg| arg.to_string()).collect(),
            code: status.code(),
            stdout: stdout.await.unwrap_or_default(),
            stderr: stderr.await.unwrap_or_default(),
        };

        if out.failed() {
            warn!(target: "daemon", args = ?out.args, code = ?out.code, "command failed");
            return Err(DaemonError::Command { args: out.args, code: out.code, stderr: out.stderr });
        }
        Ok(out)
    }

    /// Streams the daemon's structured event log until the daemon exits or
    /// the reader is dropped.
    pub async fn log_tail(&self) -> Result<impl AsyncRead + Send + Unpin + 'static, DaemonError> {
        let resp = self.http.get(self.api_url("log/tail")).send().await?;
        let stream = resp.bytes_stream().map_err(io::Error::other);
        Ok(StreamReader::new(Box::pin(stream)))
    }

    /// Gracefully terminates the daemon and removes its repo directory.
    ///
    /// Termination is best effort and never fails: SIGTERM first, a hard
    /// kill if the process ignores it. Returns whether the daemon went down
    /// cleanly.
    pub async fn shutdown(&self) -> bool {
        let child = self.process.lock().await.take();
        let Some(mut child) = child else { return true };

        let mut clean = true;
        match child.id() {
            Some(pid) if signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() => {
                if tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await.is_err() {
                    warn!(
                        target: "daemon",
                        pid,
                        stderr = %self.diagnostics(),
                        "daemon ignored SIGTERM, killing"
                    );
                    let _ = child.kill().await;
                    clean = false;
                }
            }
            _ => {
                // already gone or unsignalable, reap whatever is left
                let _ = child.kill().await;
            }
        }

        if let Err(err) = tokio::fs::remove_dir_all(&self.repo_dir).await {
            debug!(target: "daemon", repo = %self.repo_dir.display(), %err, "failed to remove repo dir");
        }
        clean
    }

    /// Stderr collected from the daemon process so far.
    pub fn diagnostics(&self) -> String {
        String::from_utf8_lossy(&self.stderr.lock()).into_owned()
    }
}

/// Asks the kernel for a free localhost port.
async fn free_port() -> Result<u16, DaemonError> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    Ok(listener.local_addr()?.port())
}

/// Collects a child pipe into a shared buffer from its own task.
fn drain<R>(pipe: Option<R>) -> Arc<PlMutex<Vec<u8>>>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let buf = Arc::new(PlMutex::new(Vec::new()));
    if let Some(mut pipe) = pipe {
        let buf = buf.clone();
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => buf.lock().extend_from_slice(&chunk[..n]),
                }
            }
        });
    }
    buf
}

/// Reads a child pipe to the end, tolerating a missing pipe.
async fn read_to_end<R>(pipe: Option<R>) -> String
where
    R: AsyncRead + Unpin,
{
    let mut out = String::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_string(&mut out).await;
    }
    out
}

#[cfg(test)]
pub(crate) fn dangling() -> Daemon {
    // a daemon handle with no process behind it, for registry tests
    Daemon {
        cmd_port: 0,
        swarm_addr: String::new(),
        repo_dir: PathBuf::new(),
        process: Mutex::new(None),
        stderr: Default::default(),
        http: reqwest::Client::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn output(code: Option<i32>, stderr: &str) -> Output {
        Output { args: vec![], code, stdout: String::new(), stderr: stderr.to_string() }
    }

    #[test]
    fn failure_is_exit_code_or_stderr_markers() {
        assert!(!output(Some(0), "all quiet").failed());
        assert!(output(Some(1), "").failed());
        assert!(output(None, "").failed());
        for marker in ["CRITICAL", "ERROR", "WARNING"] {
            assert!(output(Some(0), &format!("12:00 {marker} boom")).failed());
        }
    }

    #[test]
    fn trimmed_strips_newlines_only() {
        let out = Output { stdout: "\nQmAddr\n\n".to_string(), ..Default::default() };
        assert_eq!(out.trimmed(), "QmAddr");
    }

    #[test]
    fn records_skip_blank_lines() {
        let out = Output {
            stdout: "{\"ID\":1,\"Owner\":\"a\",\"Price\":2,\"Size\":3}\n\n".to_string(),
            code: Some(0),
            ..Default::default()
        };
        let asks: Vec<netsim_core::Ask> = out.records().unwrap();
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].owner, "a");
    }
}
