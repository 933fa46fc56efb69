//! The session bridge: one task that owns the lifecycle manager and runs
//! every session operation in arrival order.
//!
//! Each operation is a [`BridgeCommand`] variant carrying a reply channel of
//! the exact result type, so callers get a typed answer and the dispatcher
//! must handle every action. Because commands are processed one at a time,
//! check-then-act sequences issued through this process never interleave.
//! Other tmux clients can still race us; tmux's own name uniqueness is the
//! backstop for that.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::gateway::Engine;
use crate::lifecycle::LifecycleManager;
use crate::pty::{Geometry, PtyActor, PtyHandle};
use crate::registry::Session;

pub enum BridgeCommand {
    List {
        respond_to: oneshot::Sender<Vec<Session>>,
    },
    Exists {
        name: String,
        respond_to: oneshot::Sender<bool>,
    },
    Create {
        name: String,
        cwd: Option<String>,
        respond_to: oneshot::Sender<bool>,
    },
    Kill {
        name: String,
        respond_to: oneshot::Sender<bool>,
    },
    Rename {
        old_name: String,
        new_name: String,
        respond_to: oneshot::Sender<bool>,
    },
    SendKeys {
        session: String,
        keys: String,
        respond_to: oneshot::Sender<bool>,
    },
    Attach {
        session: String,
        geometry: Geometry,
        cwd: Option<String>,
        respond_to: oneshot::Sender<Option<PtyHandle>>,
    },
    EnsureDefault {
        cwd: Option<String>,
        respond_to: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the bridge task
#[derive(Clone)]
pub struct SessionBridge {
    sender: mpsc::Sender<BridgeCommand>,
}

impl SessionBridge {
    /// Start the bridge task for `engine`.
    pub fn spawn<E: Engine>(engine: Arc<E>) -> Self {
        let (sender, receiver) = mpsc::channel(64);
        let actor = BridgeActor {
            lifecycle: LifecycleManager::new(engine),
            receiver,
        };
        tokio::spawn(actor.run());
        Self { sender }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> BridgeCommand) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.sender.send(build(tx)).await.is_err() {
            error!("Session bridge task is gone");
            return None;
        }
        rx.await.ok()
    }

    pub async fn list(&self) -> Vec<Session> {
        self.request(|respond_to| BridgeCommand::List { respond_to })
            .await
            .unwrap_or_default()
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.request(|respond_to| BridgeCommand::Exists {
            name: name.to_string(),
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn create(&self, name: &str, cwd: Option<&str>) -> bool {
        self.request(|respond_to| BridgeCommand::Create {
            name: name.to_string(),
            cwd: cwd.map(str::to_string),
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn kill(&self, name: &str) -> bool {
        self.request(|respond_to| BridgeCommand::Kill {
            name: name.to_string(),
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> bool {
        self.request(|respond_to| BridgeCommand::Rename {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn send_keys(&self, session: &str, keys: &str) -> bool {
        self.request(|respond_to| BridgeCommand::SendKeys {
            session: session.to_string(),
            keys: keys.to_string(),
            respond_to,
        })
        .await
        .unwrap_or(false)
    }

    /// Attach a new PTY client to `session`, creating the session first if
    /// needed. `None` means the session could not be ensured or the client
    /// could not be spawned.
    pub async fn attach(
        &self,
        session: &str,
        geometry: Geometry,
        cwd: Option<&str>,
    ) -> Option<PtyHandle> {
        self.request(|respond_to| BridgeCommand::Attach {
            session: session.to_string(),
            geometry,
            cwd: cwd.map(str::to_string),
            respond_to,
        })
        .await
        .flatten()
    }

    pub async fn ensure_default(&self, cwd: Option<&str>) {
        let _ = self
            .request(|respond_to| BridgeCommand::EnsureDefault {
                cwd: cwd.map(str::to_string),
                respond_to,
            })
            .await;
    }
}

struct BridgeActor<E> {
    lifecycle: LifecycleManager<E>,
    receiver: mpsc::Receiver<BridgeCommand>,
}

impl<E: Engine> BridgeActor<E> {
    async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            self.handle(command).await;
        }
        info!("Session bridge shutting down");
    }

    async fn handle(&self, command: BridgeCommand) {
        let lifecycle = &self.lifecycle;
        match command {
            BridgeCommand::List { respond_to } => {
                let _ = respond_to.send(lifecycle.list().await);
            }
            BridgeCommand::Exists { name, respond_to } => {
                let _ = respond_to.send(lifecycle.exists(&name).await);
            }
            BridgeCommand::Create {
                name,
                cwd,
                respond_to,
            } => {
                let _ = respond_to.send(lifecycle.create(&name, cwd.as_deref()).await);
            }
            BridgeCommand::Kill { name, respond_to } => {
                let _ = respond_to.send(lifecycle.kill(&name).await);
            }
            BridgeCommand::Rename {
                old_name,
                new_name,
                respond_to,
            } => {
                let _ = respond_to.send(lifecycle.rename(&old_name, &new_name).await);
            }
            BridgeCommand::SendKeys {
                session,
                keys,
                respond_to,
            } => {
                let _ = respond_to.send(lifecycle.send_keys(&session, &keys).await);
            }
            BridgeCommand::Attach {
                session,
                geometry,
                cwd,
                respond_to,
            } => {
                let handle = self.attach(&session, geometry, cwd.as_deref()).await;
                if let Err(Some(handle)) = respond_to.send(handle) {
                    // Requester went away while we were spawning
                    warn!("Attach requester for '{}' is gone, killing PTY", session);
                    let _ = handle.kill().await;
                }
            }
            BridgeCommand::EnsureDefault { cwd, respond_to } => {
                lifecycle.ensure_default(cwd.as_deref()).await;
                let _ = respond_to.send(());
            }
        }
    }

    async fn attach(
        &self,
        session: &str,
        geometry: Geometry,
        cwd: Option<&str>,
    ) -> Option<PtyHandle> {
        if !self.lifecycle.exists(session).await && !self.lifecycle.create(session, cwd).await {
            error!("Failed to create session: {}", session);
            return None;
        }

        let mut config = self.lifecycle.registry().engine().attach_command(session);
        config.geometry = Geometry::new(geometry.cols, geometry.rows);

        match PtyActor::spawn(config) {
            Ok(handle) => {
                info!(
                    "Attached pid={:?} to session={} at {}x{}",
                    handle.pid(),
                    session,
                    geometry.cols,
                    geometry.rows
                );
                Some(handle)
            }
            Err(e) => {
                error!("Failed to spawn attach client for {}: {}", session, e);
                None
            }
        }
    }
}
