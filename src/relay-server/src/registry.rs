//! Session registry - one bridge per live WebSocket connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_engine::{AgentRuntime, BridgeError, QueryOptions, SessionBridge};
use relay_protocol::ServerMessage;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `remove` waits for a closed bridge's pull loop to exit.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Tracks active sessions by connection id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ManagedSession>>,
    runtime: Arc<dyn AgentRuntime>,
    interrupt_timeout: Duration,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("interrupt_timeout", &self.interrupt_timeout)
            .finish_non_exhaustive()
    }
}

/// A bridge and the task driving it.
struct ManagedSession {
    bridge: Arc<SessionBridge>,
    task: JoinHandle<()>,
    created_at: Instant,
}

impl SessionRegistry {
    pub fn new(runtime: Arc<dyn AgentRuntime>, interrupt_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            runtime,
            interrupt_timeout,
        }
    }

    /// Create a bridge for a connection and start its pull loop.
    pub async fn create_session(
        &self,
        connection_id: &str,
        options: QueryOptions,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Arc<SessionBridge> {
        let bridge = Arc::new(
            SessionBridge::new(Arc::clone(&self.runtime), options, outbound)
                .with_interrupt_timeout(self.interrupt_timeout),
        );

        let task = tokio::spawn({
            let bridge = Arc::clone(&bridge);
            let connection_id = connection_id.to_string();
            async move {
                match bridge.start().await {
                    Ok(()) => debug!(connection_id = %connection_id, "Session ended"),
                    Err(BridgeError::Runtime(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "Session ended by runtime failure");
                    }
                    Err(e) => warn!(connection_id = %connection_id, error = %e, "Session did not run"),
                }
            }
        });

        let managed = ManagedSession {
            bridge: Arc::clone(&bridge),
            task,
            created_at: Instant::now(),
        };

        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.insert(connection_id.to_string(), managed) {
            warn!(connection_id = %connection_id, "Replacing existing session");
            previous.bridge.close();
            previous.task.abort();
        }
        info!(connection_id = %connection_id, active = sessions.len(), "Session created");

        bridge
    }

    pub async fn get(&self, connection_id: &str) -> Option<Arc<SessionBridge>> {
        let sessions = self.sessions.read().await;
        sessions
            .get(connection_id)
            .map(|session| Arc::clone(&session.bridge))
    }

    /// Close and forget a session. Returns `false` if it was not registered.
    pub async fn remove(&self, connection_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(connection_id);
        let Some(session) = removed else {
            return false;
        };

        session.bridge.close();
        let mut task = session.task;
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!(connection_id = %connection_id, "Session did not stop in time, aborting");
            task.abort();
        }

        info!(
            connection_id = %connection_id,
            lifetime_secs = session.created_at.elapsed().as_secs(),
            "Session removed"
        );
        true
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close every session. Called on server shutdown.
    pub async fn shutdown_all(&self) {
        let connection_ids: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions.keys().cloned().collect()
        };

        if connection_ids.is_empty() {
            info!("No active sessions to shutdown");
            return;
        }

        info!("Shutting down {} active sessions", connection_ids.len());
        for connection_id in connection_ids {
            self.remove(&connection_id).await;
        }
        info!("All sessions shutdown complete");
    }
}
