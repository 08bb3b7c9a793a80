//! Child process transport for external plugins
//!
//! A [`PluginProcess`] owns one launched plugin. Requests are written to the
//! child's stdin as newline-delimited JSON-RPC; a reader task drains stdout and
//! hands each response to the caller waiting on its ID. stderr is treated as
//! plugin log output.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::{IpcError, IpcResult};
use crate::protocol::{methods, RpcRequest, RpcResponse};

/// Environment variable carrying the plugin's own directory
pub const PLUGIN_PATH_ENV: &str = "PLUGIN_PATH";

type PendingMap = HashMap<u64, oneshot::Sender<RpcResponse>>;

/// Receives stderr lines emitted by a plugin process
pub trait LogSink: Send + Sync {
    fn log_line(&self, plugin_id: &str, line: &str);
}

/// Everything needed to launch a plugin process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub plugin_id: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(
        plugin_id: impl Into<String>,
        program: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Human readable command line, used for logs and the CLI
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// A running external plugin process
pub struct PluginProcess {
    plugin_id: String,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Arc<Mutex<PendingMap>>,
    next_id: AtomicU64,
    running: AtomicBool,
    exited: Arc<AtomicBool>,
    stop_requested: AtomicBool,
}

impl std::fmt::Debug for PluginProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginProcess")
            .field("plugin_id", &self.plugin_id)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish()
    }
}

impl PluginProcess {
    /// Launch the process described by `spec` and start its reader tasks
    pub fn spawn(spec: &LaunchSpec, log_sink: Option<Arc<dyn LogSink>>) -> IpcResult<Self> {
        debug!(
            target: "plugin_process",
            plugin_id = %spec.plugin_id,
            command = %spec.command_line(),
            "Spawning plugin process"
        );

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .env(PLUGIN_PATH_ENV, &spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| IpcError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or(IpcError::StreamUnavailable("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(IpcError::StreamUnavailable("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(IpcError::StreamUnavailable("stderr"))?;

        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let exited = Arc::new(AtomicBool::new(false));

        tokio::spawn(stdout_reader_task(
            spec.plugin_id.clone(),
            stdout,
            pending.clone(),
            exited.clone(),
        ));
        tokio::spawn(stderr_reader_task(spec.plugin_id.clone(), stderr, log_sink));

        info!(
            target: "plugin_process",
            plugin_id = %spec.plugin_id,
            pid = ?pid,
            "Plugin process started"
        );

        Ok(Self {
            plugin_id: spec.plugin_id.clone(),
            pid,
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(true),
            exited,
            stop_requested: AtomicBool::new(false),
        })
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True until stop begins or the child closes its stdout
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.exited.load(Ordering::SeqCst)
    }

    /// Number of requests still waiting for a response
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` bounds the whole exchange, including the write to stdin.
    pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> IpcResult<Value> {
        if !self.running.load(Ordering::SeqCst) && method != methods::SHUTDOWN {
            return Err(IpcError::NotRunning);
        }

        let deadline = Instant::now() + timeout;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let line = RpcRequest::new(id, method, params).to_line()?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            // Checked under the ledger lock so the reader's final drain cannot miss us
            if self.exited.load(Ordering::SeqCst) {
                return Err(IpcError::ProcessExited);
            }
            pending.insert(id, tx);
        }

        let result = match self.write_line(&line, deadline).await {
            Ok(()) => match timeout_at(deadline, rx).await {
                Ok(Ok(response)) => return response.into_result(),
                Ok(Err(_)) => return Err(IpcError::ProcessExited),
                Err(_) => None,
            },
            Err(WriteFailure::Io(e)) => Some(e),
            Err(WriteFailure::Elapsed) => None,
        };

        self.pending.lock().await.remove(&id);
        match result {
            Some(e) => Err(e),
            None => {
                debug!(
                    target: "plugin_process",
                    plugin_id = %self.plugin_id,
                    request_id = id,
                    method,
                    "Request timed out"
                );
                Err(IpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn write_line(&self, line: &str, deadline: Instant) -> Result<(), WriteFailure> {
        let mut guard = timeout_at(deadline, self.stdin.lock())
            .await
            .map_err(|_| WriteFailure::Elapsed)?;
        let stdin = guard
            .as_mut()
            .ok_or(WriteFailure::Io(IpcError::NotRunning))?;

        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };

        let outcome = timeout_at(deadline, write).await;
        match outcome {
            Ok(result) => result.map_err(|e| WriteFailure::Io(e.into())),
            Err(_) => {
                // A partial line may be on the pipe; nothing after it could be framed
                warn!(
                    target: "plugin_process",
                    plugin_id = %self.plugin_id,
                    "Plugin is not reading stdin, closing it"
                );
                *guard = None;
                Err(WriteFailure::Elapsed)
            }
        }
    }

    /// Stop the process: ask politely, close stdin, then kill once `grace` is spent.
    ///
    /// The shutdown request gets half of `grace`, waiting for exit gets the
    /// rest. Only the first call does anything; later calls return immediately.
    pub async fn stop(&self, grace: Duration) -> IpcResult<()> {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        debug!(target: "plugin_process", plugin_id = %self.plugin_id, "Stopping plugin process");
        self.running.store(false, Ordering::SeqCst);
        let deadline = Instant::now() + grace;

        if let Err(e) = self.call(methods::SHUTDOWN, Value::Null, grace / 2).await {
            debug!(
                target: "plugin_process",
                plugin_id = %self.plugin_id,
                error = %e,
                "Shutdown request not acknowledged"
            );
        }

        // Closing stdin lets well-behaved plugins see EOF. A writer stuck on a
        // full pipe keeps the lock; the kill below unblocks it.
        match timeout_at(deadline, self.stdin.lock()).await {
            Ok(mut stdin) => drop(stdin.take()),
            Err(_) => debug!(
                target: "plugin_process",
                plugin_id = %self.plugin_id,
                "stdin busy, skipping close"
            ),
        }

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match timeout_at(deadline, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(
                        target: "plugin_process",
                        plugin_id = %self.plugin_id,
                        status = %status,
                        "Plugin process exited"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "plugin_process",
                        plugin_id = %self.plugin_id,
                        error = %e,
                        "Failed waiting for plugin process"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "plugin_process",
                        plugin_id = %self.plugin_id,
                        grace_ms = grace.as_millis() as u64,
                        "Plugin did not exit in time, killing"
                    );
                    if let Err(e) = child.start_kill() {
                        debug!(target: "plugin_process", plugin_id = %self.plugin_id, error = %e, "Kill failed");
                    }
                    child.wait().await?;
                }
            }
        }

        info!(target: "plugin_process", plugin_id = %self.plugin_id, "Plugin process stopped");
        Ok(())
    }
}

/// Why a request line could not be written
enum WriteFailure {
    Elapsed,
    Io(IpcError),
}

async fn stdout_reader_task(
    plugin_id: String,
    stdout: ChildStdout,
    pending: Arc<Mutex<PendingMap>>,
    exited: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_response(&plugin_id, &line, &pending).await,
            Ok(None) => break,
            Err(e) => {
                debug!(target: "plugin_process", plugin_id = %plugin_id, error = %e, "stdout read failed");
                break;
            }
        }
    }

    // Dropping the senders wakes every waiter with ProcessExited
    let mut pending = pending.lock().await;
    exited.store(true, Ordering::SeqCst);
    let abandoned = pending.len();
    pending.clear();

    debug!(
        target: "plugin_process",
        plugin_id = %plugin_id,
        abandoned,
        "Plugin stdout closed"
    );
}

async fn dispatch_response(plugin_id: &str, line: &str, pending: &Mutex<PendingMap>) {
    if line.trim().is_empty() {
        return;
    }

    let response = match RpcResponse::parse_line(line) {
        Ok(response) => response,
        Err(_) => {
            debug!(target: "plugin_process", plugin_id, line, "Ignoring non-JSON-RPC output");
            return;
        }
    };

    let Some(id) = response.id else {
        debug!(target: "plugin_process", plugin_id, "Ignoring response without id");
        return;
    };

    match pending.lock().await.remove(&id) {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => {
            debug!(target: "plugin_process", plugin_id, request_id = id, "No pending request for response");
        }
    }
}

async fn stderr_reader_task(
    plugin_id: String,
    stderr: ChildStderr,
    log_sink: Option<Arc<dyn LogSink>>,
) {
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "plugin_output", plugin_id = %plugin_id, "{}", line);
        if let Some(sink) = &log_sink {
            sink.log_line(&plugin_id, &line);
        }
    }
}
