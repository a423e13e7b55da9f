use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::process::{CommandSpec, group_leader, kill_process_group};

/// First port handed out when none is configured.
pub const DEFAULT_BASE_PORT: u16 = 12111;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_active_servers: usize,
    /// Delay between admission checks while the pool is full. There is no upper
    /// bound on the total wait; callers that need one wrap `request_start` in
    /// their own timeout.
    pub start_interval: Duration,
    pub base_port: u16,
    /// How long a started runner may take to accept connections on its port.
    /// `None` hands the instance out as soon as it is spawned.
    pub ready_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active_servers: 5,
            start_interval: Duration::from_millis(100),
            base_port: DEFAULT_BASE_PORT,
            ready_timeout: Some(Duration::from_secs(20)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    Pending,
    Active,
    Stopped,
}

/// Snapshot of a tracked runner instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInstance {
    pub id: usize,
    pub port: u16,
    pub state: InstanceState,
}

/// How to launch one instance. `{port}` in the command is replaced with the
/// port assigned to the instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub command: String,
    pub cwd: PathBuf,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no ports left above {0}")]
    PortsExhausted(u16),
    #[error("runner on port {0} was stopped before it could start")]
    StoppedWhilePending(u16),
    #[error("runner on port {0} exited before accepting connections")]
    StoppedBeforeReady(u16),
    #[error("runner on port {port} did not accept connections within {waited_ms}ms")]
    NotReady { port: u16, waited_ms: u64 },
    #[error("empty server command")]
    EmptyCommand,
    #[error("failed to start runner on port {port}: {source}")]
    Spawn {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

struct Tracked {
    instance: RunnerInstance,
    child: Option<Child>,
}

struct PoolState {
    next_port: Option<u16>,
    instances: Vec<Tracked>,
}

impl PoolState {
    /// Mark instances whose process has exited on its own as stopped.
    fn reap_exited(&mut self) {
        for tracked in &mut self.instances {
            if tracked.instance.state != InstanceState::Active {
                continue;
            }
            let exited = match tracked.child.as_mut().map(Child::try_wait) {
                Some(Ok(Some(_))) | None => true,
                Some(Ok(None)) => false,
                Some(Err(err)) => {
                    warn!(port = tracked.instance.port, error = %err, "could not poll runner");
                    false
                }
            };
            if exited {
                debug!(port = tracked.instance.port, "runner exited");
                tracked.instance.state = InstanceState::Stopped;
                tracked.child = None;
            }
        }
    }

    fn active_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|t| t.instance.state == InstanceState::Active)
            .count()
    }
}

/// Bounds how many long-lived test runner processes are active at once.
///
/// Admission is polled: a start request that finds the pool full sleeps for
/// `start_interval` and checks again, indefinitely. Readiness of a started
/// instance is polled at the same interval. Ports come from a counter
/// owned by the pool and are never reused, even after an instance stops.
pub struct RunnerPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl RunnerPool {
    pub fn new(config: PoolConfig) -> Self {
        let next_port = Some(config.base_port);
        Self {
            config,
            state: Mutex::new(PoolState {
                next_port,
                instances: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new instance and start it once fewer than
    /// `max_active_servers` instances are active. With a `ready_timeout` the
    /// instance is only returned once its port accepts a connection; it holds
    /// its slot while booting.
    pub async fn request_start(&self, launch: &InstanceConfig) -> Result<RunnerInstance, PoolError> {
        let id = {
            let mut state = self.lock();
            let port = state
                .next_port
                .ok_or(PoolError::PortsExhausted(u16::MAX))?;
            state.next_port = port.checked_add(1);
            let id = state.instances.len();
            state.instances.push(Tracked {
                instance: RunnerInstance { id, port, state: InstanceState::Pending },
                child: None,
            });
            id
        };

        let instance = loop {
            {
                let mut state = self.lock();
                state.reap_exited();
                let tracked = &state.instances[id].instance;
                if tracked.state == InstanceState::Stopped {
                    return Err(PoolError::StoppedWhilePending(tracked.port));
                }
                if state.active_count() < self.config.max_active_servers {
                    break Self::start(&mut state.instances[id], launch)?;
                }
            }
            trace!(
                id,
                max = self.config.max_active_servers,
                "runner pool full, postponing start"
            );
            tokio::time::sleep(self.config.start_interval).await;
        };

        match self.config.ready_timeout {
            Some(limit) => self.wait_until_ready(instance, limit).await,
            None => Ok(instance),
        }
    }

    async fn wait_until_ready(&self, instance: RunnerInstance, limit: Duration) -> Result<RunnerInstance, PoolError> {
        let deadline = Instant::now() + limit;
        loop {
            if TcpStream::connect((Ipv4Addr::LOCALHOST, instance.port)).await.is_ok() {
                debug!(port = instance.port, "runner accepting connections");
                return Ok(instance);
            }
            {
                let mut state = self.lock();
                state.reap_exited();
                if state.instances[instance.id].instance.state == InstanceState::Stopped {
                    return Err(PoolError::StoppedBeforeReady(instance.port));
                }
            }
            if Instant::now() >= deadline {
                warn!(port = instance.port, "runner never accepted connections, stopping it");
                self.stop(instance.id);
                return Err(PoolError::NotReady {
                    port: instance.port,
                    waited_ms: limit.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.config.start_interval).await;
        }
    }

    fn start(tracked: &mut Tracked, launch: &InstanceConfig) -> Result<RunnerInstance, PoolError> {
        let port = tracked.instance.port;
        let Some(spec) = CommandSpec::from_template(&launch.command, &[("port", port.to_string())], &launch.cwd)
        else {
            tracked.instance.state = InstanceState::Stopped;
            return Err(PoolError::EmptyCommand);
        };

        let spawned = group_leader(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => {
                info!(port, command = %spec.display(), "runner started");
                tracked.child = Some(child);
                tracked.instance.state = InstanceState::Active;
                Ok(tracked.instance.clone())
            }
            Err(source) => {
                tracked.instance.state = InstanceState::Stopped;
                Err(PoolError::Spawn { port, source })
            }
        }
    }

    /// Stop one instance. Instances that are already stopped are left alone.
    pub fn stop(&self, id: usize) {
        let mut state = self.lock();
        if let Some(tracked) = state.instances.get_mut(id) {
            stop_tracked(tracked);
        }
    }

    /// Stop every instance that is not stopped yet. Safe to call repeatedly.
    pub fn stop_all(&self) {
        let mut state = self.lock();
        for tracked in &mut state.instances {
            stop_tracked(tracked);
        }
    }

    pub fn active_count(&self) -> usize {
        let mut state = self.lock();
        state.reap_exited();
        state.active_count()
    }

    pub fn instances(&self) -> Vec<RunnerInstance> {
        let mut state = self.lock();
        state.reap_exited();
        state.instances.iter().map(|t| t.instance.clone()).collect()
    }
}

fn stop_tracked(tracked: &mut Tracked) {
    if tracked.instance.state == InstanceState::Stopped {
        return;
    }
    if let Some(mut child) = tracked.child.take() {
        kill_process_group(&child);
        if let Err(err) = child.start_kill() {
            warn!(port = tracked.instance.port, error = %err, "failed to stop runner");
        }
    }
    debug!(port = tracked.instance.port, "runner stopped");
    tracked.instance.state = InstanceState::Stopped;
}

impl Drop for RunnerPool {
    fn drop(&mut self) {
        self.stop_all();
    }
}
