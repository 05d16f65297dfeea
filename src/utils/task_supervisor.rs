use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use crate::error::{Error, Result};

/// Tracks the long-running tasks of the service (scheduler, HTTP API).
///
/// A supervised task finishing on its own is treated as a failure; on
/// shutdown tasks get a grace period to drain before being aborted.
pub struct TaskSupervisor {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: HashMap::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let handle = tokio::spawn(future);

        info!("Spawned background task: {}", name);
        self.tasks.insert(name, handle);
        self
    }

    /// Errors if any task has terminated.
    pub fn check_health(&mut self) -> Result<()> {
        let failed: Vec<String> = self.tasks.iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();

        if failed.is_empty() {
            return Ok(());
        }

        for name in &failed {
            self.tasks.remove(name);
        }
        let msg = format!("tasks terminated unexpectedly: {:?}", failed);
        error!("{}", msg);
        Err(Error::TaskFailed(msg))
    }

    pub fn active_task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Waits up to `grace` for every task, then aborts stragglers.
    pub async fn shutdown(&mut self, grace: Duration) {
        info!("Waiting up to {:?} for {} tasks", grace, self.tasks.len());

        for (name, mut handle) in self.tasks.drain() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => info!("Task {} stopped", name),
                Ok(Err(e)) => warn!("Task {} ended with {}", name, e),
                Err(_) => {
                    handle.abort();
                    warn!("Aborted task {} after grace period", name);
                }
            }
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
