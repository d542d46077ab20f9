//! Process-level shutdown and restart coordination.
//!
//! Two external inputs drive the node: the process termination signal and
//! credential reload signals. A termination signal stops the node and
//! ends the run loop. A reload signal gracefully terminates the node and
//! runs it again, so the engine picks up the new credentials from a
//! freshly built configuration.
//!
//! Both inputs are handled on the same task as `run`, and neither
//! `stop` nor `terminate` is issued before the node has reached
//! `Running`.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use gridwarden_core::LifecycleState;
use gridwarden_watch::ReloadSignal;

use crate::error::LifecycleResult;
use crate::lifecycle::{NodeLifecycleManager, StopReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    None,
    Stop,
    Restart,
}

pub struct ShutdownCoordinator {
    manager: Arc<NodeLifecycleManager>,
}

impl ShutdownCoordinator {
    pub fn new(manager: Arc<NodeLifecycleManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<NodeLifecycleManager> {
        &self.manager
    }

    /// Run the node until `shutdown` resolves or the engine stops on its
    /// own, restarting it on every reload signal.
    pub async fn run<S>(
        &self,
        shutdown: S,
        mut reloads: mpsc::UnboundedReceiver<ReloadSignal>,
    ) -> LifecycleResult<StopReason>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut state = self.manager.subscribe_state();
        let mut quitting = false;

        loop {
            let mut pending = Pending::None;
            let mut restart = false;

            let run = self.manager.run();
            tokio::pin!(run);

            let reason = loop {
                tokio::select! {
                    result = &mut run => break result?,
                    _ = &mut shutdown, if !quitting => {
                        info!("termination signal received, stopping node");
                        quitting = true;
                        pending = Pending::Stop;
                    }
                    Some(ReloadSignal) = reloads.recv(), if !quitting => {
                        info!("credentials changed, restarting node");
                        restart = true;
                        if pending == Pending::None {
                            pending = Pending::Restart;
                        }
                    }
                    _ = wait_until_running(&mut state), if pending != Pending::None => {
                        let action = std::mem::replace(&mut pending, Pending::None);
                        let result = match action {
                            Pending::Stop => self.manager.stop().await,
                            _ => self.manager.terminate().await,
                        };
                        if let Err(e) = result {
                            warn!(error = %e, "shutdown request rejected");
                        }
                    }
                }
            };

            debug!(?reason, restart, quitting, "node run finished");
            if quitting || !restart {
                return Ok(reason);
            }
        }
    }
}

async fn wait_until_running(state: &mut watch::Receiver<LifecycleState>) {
    let _ = state.wait_for(|s| *s == LifecycleState::Running).await;
}
