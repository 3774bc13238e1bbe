pub mod cleanup;
pub mod monitor;
pub mod recovery;

use std::io;
use std::process::{Child, Command};
use std::time::Duration;

use crate::broker::Broker;
use crate::config::Config;
use crate::error::JudgeError;
use crate::sandbox;

/// Internal argv marker that re-enters the binary as a worker process.
pub const WORKER_ARG: &str = "__worker";

/// Grace between SIGTERM and SIGKILL when taking a worker down.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// Pause between the two halves of a rolling restart.
const RESTART_PHASE_PAUSE: Duration = Duration::from_millis(200);

struct WorkerSlot {
    id: usize,
    child: Child,
}

/// Owns the worker processes. Workers are re-execs of the current binary so
/// each gets its own address space and its own cooperative scheduler; the
/// pool only ever manages them through pids and exit statuses.
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
}

/// One monitor pass worth of pool statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStatus {
    pub total: usize,
    pub failed: usize,
    pub busy: usize,
    pub hanging: usize,
}

impl WorkerPool {
    pub fn start(config: &Config) -> io::Result<Self> {
        let mut slots = Vec::with_capacity(config.max_workers);
        for id in 0..config.max_workers {
            slots.push(WorkerSlot {
                id,
                child: spawn_worker(id)?,
            });
        }
        tracing::info!(count = config.max_workers, "all workers started");
        Ok(WorkerPool { slots })
    }

    /// Liveness and hang check for every worker. Dead workers are respawned
    /// under the same id; children of a worker that have outlived
    /// `max_task_execution_time` are killed as hung judging processes.
    pub fn check_workers(&mut self, config: &Config) -> PoolStatus {
        let mut status = PoolStatus {
            total: self.slots.len(),
            ..PoolStatus::default()
        };

        for slot in &mut self.slots {
            match slot.child.try_wait() {
                Ok(Some(exit)) => {
                    tracing::error!(worker_id = slot.id, ?exit, "worker died, restarting");
                    status.failed += 1;
                    match spawn_worker(slot.id) {
                        Ok(child) => slot.child = child,
                        Err(e) => {
                            tracing::error!(worker_id = slot.id, "failed to respawn worker: {e}")
                        }
                    }
                }
                Ok(None) => {
                    let (busy, hanging) = check_worker_children(slot.child.id(), config);
                    status.busy += usize::from(busy);
                    status.hanging += usize::from(hanging);
                }
                Err(e) => {
                    tracing::error!(worker_id = slot.id, "failed to poll worker: {e}");
                }
            }
        }

        status
    }

    /// Restart the pool in two halves so at least half the workers keep
    /// serving at any instant. The broker `restart` flag brackets the whole
    /// operation for operators watching from outside.
    pub async fn rolling_restart(&mut self, broker: &Broker) -> Result<(), JudgeError> {
        broker.set(&broker.keys.restart(), "True").await?;

        let total = self.slots.len();
        let half = (total / 2).max(1);
        tracing::info!(total, "rolling restart: phase one");
        self.restart_range(0, half.min(total)).await;
        tokio::time::sleep(RESTART_PHASE_PAUSE).await;
        tracing::info!(total, "rolling restart: phase two");
        self.restart_range(half.min(total), total).await;

        broker.set(&broker.keys.restart(), "False").await?;
        tracing::info!("rolling restart complete");
        Ok(())
    }

    async fn restart_range(&mut self, start: usize, end: usize) {
        for slot in &mut self.slots[start..end] {
            terminate_then_kill(&mut slot.child).await;
            match spawn_worker(slot.id) {
                Ok(child) => slot.child = child,
                Err(e) => tracing::error!(worker_id = slot.id, "failed to respawn worker: {e}"),
            }
        }
    }

    /// Hard shutdown: kill every worker without ceremony. Used when the
    /// supervisor itself is exiting; workers got their SIGTERM from the
    /// terminal's process group or get SIGKILL here.
    pub fn shutdown(&mut self) {
        for slot in &mut self.slots {
            if let Err(e) = slot.child.kill() {
                tracing::debug!(worker_id = slot.id, "kill on shutdown: {e}");
            }
            let _ = slot.child.wait();
        }
        tracing::info!("worker pool shut down");
    }
}

fn spawn_worker(id: usize) -> io::Result<Child> {
    let exe = std::env::current_exe()?;
    let child = Command::new(exe).arg(WORKER_ARG).arg(id.to_string()).spawn()?;
    tracing::info!(worker_id = id, pid = child.id(), "worker spawned");
    Ok(child)
}

/// Inspect one live worker's judged children. Returns (busy, hanging).
fn check_worker_children(worker_pid: u32, config: &Config) -> (bool, bool) {
    let children = sandbox::descendants_of(worker_pid);
    let busy = !children.is_empty();
    let mut hanging = false;
    for child in children {
        if let Some(age) = sandbox::process_age(child)
            && age > config.max_task_execution_time
        {
            tracing::warn!(worker_pid, child, age_secs = age.as_secs(), "hung judging process, killing");
            hanging = true;
            sandbox::kill_tree(child);
        }
    }
    (busy, hanging)
}

/// SIGTERM, wait out the grace period, then SIGKILL and reap.
async fn terminate_then_kill(child: &mut Child) {
    let pid = child.id() as i32;
    // SAFETY: plain kill(2) on a pid we own.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + TERMINATE_GRACE;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(pid, "try_wait during terminate: {e}");
                break;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let _ = child.kill();
    let _ = child.wait();
}
