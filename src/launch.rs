//! Launchers: how a device console comes into existence.
//!
//! A [`Launcher`] performs the `Spawning` phase of a session and hands back
//! a boxed [`LineChannel`]. Whatever a launcher acquires before it fails is
//! released before the error is returned.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::channel::{LineChannel, MemoryChannel, ProcessChannel, PtyChannel, ReadLine};
use crate::error::{SessionError, SessionResult};
use crate::session::NodeId;

/// Placeholder in [`CommandSpec`] arguments replaced by the node id.
pub const NODE_PLACEHOLDER: &str = "{node}";

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_directory: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
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

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Copy of this spec with every `{node}` in the arguments replaced.
    pub fn for_node(&self, node: NodeId) -> Self {
        let id = node.to_string();
        Self {
            args: self
                .args
                .iter()
                .map(|a| a.replace(NODE_PLACEHOLDER, &id))
                .collect(),
            ..self.clone()
        }
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env);
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Brings up a device console for one node.
#[async_trait]
pub trait Launcher: Send + Sync {
    fn describe(&self) -> String;

    async fn launch(&self, node: NodeId) -> SessionResult<Box<dyn LineChannel>>;
}

/// Runs the console program under a pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    spec: CommandSpec,
}

impl PtyLauncher {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Launcher for PtyLauncher {
    fn describe(&self) -> String {
        format!("pty {}", self.spec.display())
    }

    async fn launch(&self, node: NodeId) -> SessionResult<Box<dyn LineChannel>> {
        Ok(Box::new(PtyChannel::spawn(&self.spec.for_node(node))?))
    }
}

/// Runs the console program with piped stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    spec: CommandSpec,
    show_stderr: bool,
}

impl ProcessLauncher {
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            show_stderr: false,
        }
    }

    pub fn with_stderr(mut self, show: bool) -> Self {
        self.show_stderr = show;
        self
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    fn describe(&self) -> String {
        format!("process {}", self.spec.display())
    }

    async fn launch(&self, node: NodeId) -> SessionResult<Box<dyn LineChannel>> {
        Ok(Box::new(ProcessChannel::spawn(
            &self.spec.for_node(node),
            self.show_stderr,
        )?))
    }
}

type ChannelFactory = Box<dyn Fn(NodeId) -> MemoryChannel + Send + Sync>;

/// Attaches to an in-process simulated device.
pub struct MemoryLauncher {
    factory: ChannelFactory,
}

impl MemoryLauncher {
    /// Build a fresh channel (and usually spawn its device task) per launch.
    pub fn new(factory: impl Fn(NodeId) -> MemoryChannel + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
        }
    }

    /// Hand out one pre-built channel; later launches get a disconnected one.
    pub fn once(channel: MemoryChannel) -> Self {
        let slot = Mutex::new(Some(channel));
        Self::new(move |_| {
            slot.lock()
                .ok()
                .and_then(|mut s| s.take())
                .unwrap_or_else(|| crate::channel::memory_pair("detached").0)
        })
    }
}

#[async_trait]
impl Launcher for MemoryLauncher {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn launch(&self, node: NodeId) -> SessionResult<Box<dyn LineChannel>> {
        Ok(Box::new((self.factory)(node)))
    }
}

/// Answers "is the backing service ready to accept commands".
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self) -> bool;
}

/// Probe that succeeds when a command exits successfully.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    spec: CommandSpec,
}

impl CommandProbe {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl LivenessProbe for CommandProbe {
    async fn probe(&self) -> bool {
        let status = self
            .spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) => status.success(),
            Err(e) => {
                debug!(probe = %self.spec.display(), error = %e, "probe failed to run");
                false
            }
        }
    }
}

/// Probe backed by a closure.
pub struct FnProbe<F>(pub F);

#[async_trait]
impl<F> LivenessProbe for FnProbe<F>
where
    F: Fn() -> bool + Send + Sync,
{
    async fn probe(&self) -> bool {
        (self.0)()
    }
}

/// Starts a long-running backing service, waits for it to become ready in
/// real time, then attaches a console to it.
pub struct ContainerLauncher {
    service: CommandSpec,
    probe: Arc<dyn LivenessProbe>,
    console: CommandSpec,
    cleanup: Option<CommandSpec>,
    ready_timeout: Duration,
    retry_interval: Duration,
    show_output: bool,
}

impl ContainerLauncher {
    pub fn new(service: CommandSpec, probe: Arc<dyn LivenessProbe>, console: CommandSpec) -> Self {
        Self {
            service,
            probe,
            console,
            cleanup: None,
            ready_timeout: Duration::from_secs(300),
            retry_interval: Duration::from_secs(5),
            show_output: false,
        }
    }

    /// Command that removes the service's leftovers (e.g. `docker rm -f`).
    pub fn with_cleanup(mut self, cleanup: CommandSpec) -> Self {
        self.cleanup = Some(cleanup);
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    async fn wait_ready(&self, node: NodeId, service: &mut Child) -> SessionResult<()> {
        let deadline = Instant::now() + self.ready_timeout;
        loop {
            if let Some(status) = service.try_wait()? {
                return Err(SessionError::launch_failed(
                    node,
                    format!("service exited early with {status}"),
                ));
            }
            if self.probe.probe().await {
                info!(node, service = %self.service.display(), "service is ready");
                return Ok(());
            }
            if Instant::now() + self.retry_interval > deadline {
                return Err(SessionError::launch_failed(
                    node,
                    format!("service not ready within {:?}", self.ready_timeout),
                ));
            }
            sleep(self.retry_interval).await;
        }
    }
}

#[async_trait]
impl Launcher for ContainerLauncher {
    fn describe(&self) -> String {
        format!("service {}", self.service.display())
    }

    async fn launch(&self, node: NodeId) -> SessionResult<Box<dyn LineChannel>> {
        let service_spec = self.service.for_node(node);
        let cleanup = self.cleanup.as_ref().map(|c| c.for_node(node));
        let output = || {
            if self.show_output {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };

        let spawned = service_spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .kill_on_drop(true)
            .spawn();
        let mut service = match spawned {
            Ok(child) => child,
            Err(e) => {
                run_cleanup(cleanup.as_ref(), self.retry_interval).await;
                return Err(SessionError::spawn(&service_spec.program, e));
            }
        };

        let grace = self.retry_interval;
        if let Err(e) = self.wait_ready(node, &mut service).await {
            stop_service(&mut service, cleanup.as_ref(), grace).await;
            return Err(e);
        }

        match ProcessChannel::spawn(&self.console.for_node(node), self.show_output) {
            Ok(console) => Ok(Box::new(ServiceChannel {
                console,
                service,
                cleanup,
            })),
            Err(e) => {
                stop_service(&mut service, cleanup.as_ref(), grace).await;
                Err(e)
            }
        }
    }
}

/// Console attached to a service this crate started; closing it stops both.
struct ServiceChannel {
    console: ProcessChannel,
    service: Child,
    cleanup: Option<CommandSpec>,
}

#[async_trait]
impl LineChannel for ServiceChannel {
    fn describe(&self) -> String {
        self.console.describe()
    }

    async fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.console.write(data).await
    }

    async fn read_line(&mut self, slice: Duration) -> std::io::Result<ReadLine> {
        self.console.read_line(slice).await
    }

    fn partial(&self) -> String {
        self.console.partial()
    }

    fn is_alive(&mut self) -> bool {
        self.console.is_alive() && matches!(self.service.try_wait(), Ok(None))
    }

    async fn send_eof(&mut self) -> std::io::Result<()> {
        self.console.send_eof().await
    }

    async fn close(&mut self, grace: Duration) -> std::io::Result<()> {
        let result = self.console.close(grace).await;
        stop_service(&mut self.service, self.cleanup.as_ref(), grace).await;
        result
    }
}

async fn run_cleanup(cleanup: Option<&CommandSpec>, grace: Duration) {
    let Some(spec) = cleanup else {
        return;
    };
    let status = tokio::time::timeout(
        grace,
        spec.to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await;
    match status {
        Ok(Ok(status)) if status.success() => debug!(cleanup = %spec.display(), "cleanup done"),
        Ok(Ok(status)) => warn!(cleanup = %spec.display(), %status, "cleanup failed"),
        Ok(Err(e)) => warn!(cleanup = %spec.display(), error = %e, "cleanup failed to run"),
        Err(_) => warn!(cleanup = %spec.display(), "cleanup timed out"),
    }
}

async fn stop_service(service: &mut Child, cleanup: Option<&CommandSpec>, grace: Duration) {
    run_cleanup(cleanup, grace).await;
    if matches!(service.try_wait(), Ok(None)) {
        if let Err(e) = service.kill().await {
            warn!(error = %e, "failed to kill service");
        }
    }
}
