use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::codec::{self, InboundMessage};
use crate::error::AcpHostError;
use crate::transport::{AgentTransport, INBOUND_CHANNEL_CAPACITY};

/// Directories prefixed to the inherited `PATH` so agents installed by npm,
/// homebrew, or per-user installers resolve even when the host was launched
/// from a GUI with a minimal environment.
const EXTRA_PATH_DIRS: &[&str] = &[
    "~/.local/bin",
    "~/.npm-global/bin",
    "/opt/homebrew/bin",
    "/usr/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
];

/// Talks to an agent spawned as a child process over line-delimited JSON on
/// its standard pipes. Stderr is drained to the host log and never carries
/// protocol traffic.
///
/// Writes go to the child's stdin behind a lock; a vanishing child surfaces
/// as an `EPIPE` on the next write (the Rust runtime ignores `SIGPIPE`
/// process-wide), reported as [`AcpHostError::SendFailed`] annotated with
/// the exit status when it is already known.
pub struct ProcessTransport {
    command: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    state: Mutex<ProcessState>,
}

enum ProcessState {
    Idle,
    Running(RunningProcess),
    Stopped,
}

struct RunningProcess {
    child: Child,
    stdin: Arc<Mutex<ChildStdin>>,
    inbound: Option<mpsc::Receiver<InboundMessage>>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
}

impl ProcessTransport {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            state: Mutex::new(ProcessState::Idle),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl AgentTransport for ProcessTransport {
    async fn connect(&self) -> Result<(), AcpHostError> {
        let mut state = self.state.lock().await;
        if matches!(*state, ProcessState::Running(_)) {
            return Err(AcpHostError::AlreadyConnected);
        }

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .env("PATH", search_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| AcpHostError::Launch {
            command: self.command.clone(),
            source,
        })?;

        let stdin = take_pipe(child.stdin.take(), &self.command, "stdin")?;
        let stdout = take_pipe(child.stdout.take(), &self.command, "stdout")?;
        let stderr = take_pipe(child.stderr.take(), &self.command, "stderr")?;

        let (tx, rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let stdout_task = tokio::spawn(read_stdout(stdout, tx));
        let stderr_task = tokio::spawn(drain_stderr(stderr));

        *state = ProcessState::Running(RunningProcess {
            child,
            stdin: Arc::new(Mutex::new(stdin)),
            inbound: Some(rx),
            stdout_task,
            stderr_task,
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AcpHostError> {
        let mut state = self.state.lock().await;
        if let ProcessState::Running(mut running) =
            std::mem::replace(&mut *state, ProcessState::Stopped)
        {
            running.stdout_task.abort();
            running.stderr_task.abort();
            let _ = running.child.start_kill();
            let _ = running.child.try_wait();
        }
        Ok(())
    }

    async fn send_frame(&self, frame: String) -> Result<(), AcpHostError> {
        let stdin = {
            let state = self.state.lock().await;
            match &*state {
                ProcessState::Running(running) => Arc::clone(&running.stdin),
                ProcessState::Idle | ProcessState::Stopped => {
                    return Err(AcpHostError::NotConnected)
                }
            }
        };

        let mut stdin = stdin.lock().await;
        let outcome = async {
            stdin.write_all(frame.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        drop(stdin);

        if let Err(err) = outcome {
            let mut state = self.state.lock().await;
            let status = match &mut *state {
                ProcessState::Running(running) => running.child.try_wait().ok().flatten(),
                _ => None,
            };
            let reason = match status {
                Some(status) => format!("{err} (agent exited with {status})"),
                None => err.to_string(),
            };
            return Err(AcpHostError::SendFailed { reason });
        }
        Ok(())
    }

    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        match &mut *self.state.lock().await {
            ProcessState::Running(running) => running.inbound.take(),
            _ => None,
        }
    }
}

fn take_pipe<T>(pipe: Option<T>, command: &Path, name: &str) -> Result<T, AcpHostError> {
    pipe.ok_or_else(|| AcpHostError::Launch {
        command: command.to_path_buf(),
        source: io::Error::other(format!("child {name} was not captured")),
    })
}

fn search_path() -> std::ffi::OsString {
    let home = std::env::var("HOME").ok();
    let mut dirs: Vec<PathBuf> = EXTRA_PATH_DIRS
        .iter()
        .filter_map(|dir| match dir.strip_prefix("~/") {
            Some(rest) => home.as_ref().map(|home| Path::new(home).join(rest)),
            None => Some(PathBuf::from(dir)),
        })
        .collect();
    if let Some(inherited) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&inherited));
    }
    std::env::join_paths(&dirs)
        .unwrap_or_else(|_| std::env::var_os("PATH").unwrap_or_default())
}

/// Reads raw chunks from the child's stdout, splits on newlines, and feeds
/// each complete line through the codec. End of stream flushes any trailing
/// partial line, then the sender drops, closing the inbound channel.
async fn read_stdout(mut stdout: ChildStdout, tx: mpsc::Sender<InboundMessage>) {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::warn!(error = %err, "agent stdout read failed");
                break;
            }
        };
        buffer.extend_from_slice(&chunk[..n]);
        while let Some(pos) = buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = buffer.drain(..=pos).collect();
            if !deliver_line(&line[..line.len() - 1], &tx).await {
                return;
            }
        }
    }
    if !buffer.is_empty() {
        deliver_line(&buffer, &tx).await;
    }
}

/// Returns `false` once the receiver is gone and reading should stop.
async fn deliver_line(raw: &[u8], tx: &mpsc::Sender<InboundMessage>) -> bool {
    let line = String::from_utf8_lossy(raw);
    match codec::classify_line(&line) {
        None => true,
        Some(Ok(message)) => tx.send(message).await.is_ok(),
        Some(Err(err)) => {
            tracing::warn!(error = %err, "dropping malformed frame from agent");
            true
        }
    }
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !line.trim().is_empty() {
            tracing::error!(target: "acp_host::agent_stderr", "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acp_schema::{JsonRpcRequest, RequestId};

    #[cfg(unix)]
    fn write_fake_agent(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-agent");
        std::fs::write(&path, script).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn search_path_prefixes_the_common_binary_dirs() {
        let path = search_path();
        let dirs: Vec<PathBuf> = std::env::split_paths(&path).collect();
        assert!(dirs.contains(&PathBuf::from("/usr/local/bin")));
        assert!(dirs.contains(&PathBuf::from("/bin")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn round_trips_a_frame_and_skips_banner_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_fake_agent(
            dir.path(),
            concat!(
                "#!/bin/sh\n",
                "echo \"agent booting\"\n",
                "read line\n",
                "printf '{\"jsonrpc\":\"2.0\",\"id\":\"1\",\"result\":{\"ok\":true}}\\n'\n",
            ),
        );

        let transport = ProcessTransport::new(&script).working_dir(dir.path());
        transport.connect().await.unwrap();
        let mut inbound = transport.take_inbound().await.unwrap();

        let frame = codec::encode(&JsonRpcRequest::new(
            RequestId::from_counter(1),
            "initialize",
            None,
        ))
        .unwrap();
        transport.send_frame(frame).await.unwrap();

        match inbound.recv().await {
            Some(InboundMessage::Response { id, result }) => {
                assert_eq!(id, RequestId::from("1"));
                assert_eq!(result["ok"], serde_json::json!(true));
            }
            other => panic!("unexpected message: {other:?}"),
        }

        // Script exits after one reply; EOF closes the channel.
        assert!(inbound.recv().await.is_none());
        transport.disconnect().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn eof_flushes_a_trailing_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_fake_agent(
            dir.path(),
            concat!(
                "#!/bin/sh\n",
                "printf '{\"jsonrpc\":\"2.0\",\"method\":\"session/update\",\"params\":{}}'\n",
            ),
        );

        let transport = ProcessTransport::new(&script);
        transport.connect().await.unwrap();
        let mut inbound = transport.take_inbound().await.unwrap();

        match inbound.recv().await {
            Some(InboundMessage::Notification { method, .. }) => {
                assert_eq!(method, "session/update");
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(inbound.recv().await.is_none());
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn launch_failure_reports_the_command() {
        let transport = ProcessTransport::new("/nonexistent/agent-binary");
        match transport.connect().await {
            Err(AcpHostError::Launch { command, .. }) => {
                assert_eq!(command, PathBuf::from("/nonexistent/agent-binary"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_without_connect_is_not_connected() {
        let transport = ProcessTransport::new("true");
        match transport.send_frame("{}".to_string()).await {
            Err(AcpHostError::NotConnected) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
