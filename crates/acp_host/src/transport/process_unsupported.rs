use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::codec::InboundMessage;
use crate::error::AcpHostError;
use crate::transport::AgentTransport;

/// Stub for platforms without child-process APIs. Keeps the constructor
/// surface so hosts compile everywhere; `connect` always fails.
pub struct ProcessTransport {
    command: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl ProcessTransport {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
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
        let _ = (&self.command, &self.args, &self.working_dir, &self.env);
        Err(AcpHostError::UnsupportedPlatform)
    }

    async fn disconnect(&self) -> Result<(), AcpHostError> {
        Ok(())
    }

    async fn send_frame(&self, _frame: String) -> Result<(), AcpHostError> {
        Err(AcpHostError::NotConnected)
    }

    async fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        None
    }
}
