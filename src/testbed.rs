//! Run-scoped ownership of sessions.
//!
//! A [`Testbed`] holds everything one test run shares: node id allocation,
//! the [`RunConfig`] and the virtual clock. Sessions opened through it stay
//! registered until [`Testbed::shutdown_all`] closes them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::VirtualClock;
use crate::config::{RunConfig, SessionConfig};
use crate::error::{SessionError, SessionResult};
use crate::launch::Launcher;
use crate::session::{NodeId, Session};

pub struct Testbed {
    run: RunConfig,
    clock: Arc<dyn VirtualClock>,
    /// `None` once the id space is used up.
    next_id: Option<NodeId>,
    sessions: BTreeMap<NodeId, Arc<Session>>,
}

impl Testbed {
    pub fn new(run: RunConfig, clock: Arc<dyn VirtualClock>) -> Self {
        Self {
            run,
            clock,
            next_id: Some(1),
            sessions: BTreeMap::new(),
        }
    }

    /// Allocate ids starting at `id` instead of 1.
    pub fn with_first_id(mut self, id: NodeId) -> Self {
        self.next_id = Some(id);
        self
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    pub fn clock(&self) -> &Arc<dyn VirtualClock> {
        &self.clock
    }

    /// Open a session on the next node id with the run's session config.
    pub async fn add_node(&mut self, launcher: &dyn Launcher) -> SessionResult<Arc<Session>> {
        let config = self.run.session.clone();
        self.add_node_with(launcher, config).await
    }

    /// Open a session on the next node id with an explicit config.
    ///
    /// The id is consumed even when the open fails, so ids are never reused
    /// within a run.
    pub async fn add_node_with(
        &mut self,
        launcher: &dyn Launcher,
        config: SessionConfig,
    ) -> SessionResult<Arc<Session>> {
        let id = self.allocate_id()?;

        let session = Arc::new(Session::open(id, launcher, self.clock.clone(), config).await?);
        self.sessions.insert(id, session.clone());
        info!(node = id, nodes = self.sessions.len(), "node added");
        Ok(session)
    }

    fn allocate_id(&mut self) -> SessionResult<NodeId> {
        let id = self.next_id.ok_or_else(|| {
            SessionError::launch_failed(NodeId::MAX, "no node ids left in this run")
        })?;
        self.next_id = id.checked_add(1);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<Session>> {
        self.sessions.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Session>> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close and forget one node.
    pub async fn remove_node(&mut self, id: NodeId) -> SessionResult<()> {
        match self.sessions.remove(&id) {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    /// Close every session. Failures are logged and do not stop the sweep.
    pub async fn shutdown_all(&mut self) {
        for (id, session) in std::mem::take(&mut self.sessions) {
            if let Err(e) = session.close().await {
                warn!(node = id, error = %e, "close failed during shutdown");
            }
        }
        info!("all nodes shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{DeviceEnd, memory_pair};
    use crate::clock::LogicalClock;
    use crate::launch::MemoryLauncher;
    use crate::session::SessionState;

    fn simple_device(mut device: DeviceEnd) {
        tokio::spawn(async move {
            while let Some(line) = device.recv_line().await {
                if line.is_empty() {
                    device.emit_raw("> ");
                } else {
                    device.emit(&line);
                    device.emit("Done");
                }
            }
        });
    }

    fn launcher() -> MemoryLauncher {
        MemoryLauncher::new(|node| {
            let (console, device) = memory_pair(format!("node{node}"));
            simple_device(device);
            console
        })
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_shutdown_closes_all() {
        let mut testbed = Testbed::new(RunConfig::new(), Arc::new(LogicalClock::new()));
        let launcher = launcher();

        let a = testbed.add_node(&launcher).await.unwrap();
        let b = testbed.add_node(&launcher).await.unwrap();
        assert_eq!((a.id(), b.id()), (1, 2));
        assert_eq!(testbed.len(), 2);
        assert!(testbed.node(2).is_some());

        testbed.shutdown_all().await;
        assert!(testbed.is_empty());
        assert_eq!(a.state(), SessionState::Destroyed);
        assert_eq!(b.state(), SessionState::Destroyed);
    }

    #[tokio::test]
    async fn test_separate_runs_do_not_share_ids() {
        let launcher = launcher();
        let mut first = Testbed::new(RunConfig::new(), Arc::new(LogicalClock::new()));
        let mut second = Testbed::new(RunConfig::new(), Arc::new(LogicalClock::new()));

        let a = first.add_node(&launcher).await.unwrap();
        let b = second.add_node(&launcher).await.unwrap();
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 1);

        first.shutdown_all().await;
        second.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_first_id_and_remove_node() {
        let mut testbed =
            Testbed::new(RunConfig::new(), Arc::new(LogicalClock::new())).with_first_id(7);
        let node = testbed.add_node(&launcher()).await.unwrap();
        assert_eq!(node.id(), 7);

        testbed.remove_node(7).await.unwrap();
        assert!(testbed.node(7).is_none());
        assert_eq!(node.state(), SessionState::Destroyed);
    }

    #[tokio::test]
    async fn test_last_id_is_usable_once() {
        let mut testbed =
            Testbed::new(RunConfig::new(), Arc::new(LogicalClock::new())).with_first_id(NodeId::MAX);
        let launcher = launcher();

        let last = testbed.add_node(&launcher).await.unwrap();
        assert_eq!(last.id(), NodeId::MAX);

        let err = testbed.add_node(&launcher).await.unwrap_err();
        assert!(matches!(err, SessionError::LaunchFailed { .. }), "got: {err}");
        assert_eq!(testbed.len(), 1);

        testbed.shutdown_all().await;
    }
}
