//! Session lifecycle: create, kill, rename, send-keys, ensure-default.
//!
//! Every mutation checks existence first and then acts. Nothing here knows
//! about protected names; refusing to touch `default` is the caller's job.

use std::sync::Arc;
use tracing::{info, warn};

use crate::gateway::Engine;
use crate::registry::{Session, SessionRegistry};

/// Name of the session that is always present
pub const DEFAULT_SESSION: &str = "default";

/// Geometry given to freshly created sessions
pub const INITIAL_COLS: u16 = 120;
pub const INITIAL_ROWS: u16 = 30;

pub struct LifecycleManager<E> {
    registry: SessionRegistry<E>,
}

impl<E: Engine> LifecycleManager<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            registry: SessionRegistry::new(engine),
        }
    }

    pub fn registry(&self) -> &SessionRegistry<E> {
        &self.registry
    }

    fn engine(&self) -> &E {
        self.registry.engine()
    }

    pub async fn list(&self) -> Vec<Session> {
        self.registry.list().await
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.registry.exists(name).await
    }

    /// Create a detached session. Returns false if the name is taken or the
    /// engine refused.
    pub async fn create(&self, name: &str, cwd: Option<&str>) -> bool {
        if self.exists(name).await {
            return false;
        }

        let cols = INITIAL_COLS.to_string();
        let rows = INITIAL_ROWS.to_string();
        let mut args = vec![
            "new-session",
            "-d",
            "-s",
            name,
            "-x",
            cols.as_str(),
            "-y",
            rows.as_str(),
        ];
        if let Some(dir) = cwd {
            args.push("-c");
            args.push(dir);
        }

        let created = self.engine().invoke(&args).await.succeeded;
        if created {
            info!("Created session '{}'", name);
            let mouse = self
                .engine()
                .invoke(&["set-option", "-t", name, "mouse", "on"])
                .await;
            if !mouse.succeeded {
                warn!("Could not enable mouse for session '{}'", name);
            }
        } else {
            warn!("Engine refused to create session '{}'", name);
        }
        created
    }

    pub async fn kill(&self, name: &str) -> bool {
        if !self.exists(name).await {
            return false;
        }
        let killed = self
            .engine()
            .invoke(&["kill-session", "-t", name])
            .await
            .succeeded;
        if killed {
            info!("Killed session '{}'", name);
        }
        killed
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> bool {
        if !self.exists(old_name).await || self.exists(new_name).await {
            return false;
        }
        let renamed = self
            .engine()
            .invoke(&["rename-session", "-t", old_name, new_name])
            .await
            .succeeded;
        if renamed {
            info!("Renamed session '{}' -> '{}'", old_name, new_name);
        }
        renamed
    }

    /// Type `keys` into the session followed by Enter.
    pub async fn send_keys(&self, session: &str, keys: &str) -> bool {
        if !self.exists(session).await {
            return false;
        }
        self.engine()
            .invoke(&["send-keys", "-t", session, keys, "Enter"])
            .await
            .succeeded
    }

    pub async fn ensure_default(&self, cwd: Option<&str>) {
        if self.exists(DEFAULT_SESSION).await {
            return;
        }
        if self.create(DEFAULT_SESSION, cwd).await {
            info!("Created default session");
        } else {
            warn!("Failed to create default session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    fn manager() -> (Arc<FakeEngine>, LifecycleManager<FakeEngine>) {
        let engine = Arc::new(FakeEngine::new());
        (engine.clone(), LifecycleManager::new(engine))
    }

    #[tokio::test]
    async fn create_then_exists() {
        let (_, m) = manager();
        assert!(m.create("work", None).await);
        assert!(m.exists("work").await);
    }

    #[tokio::test]
    async fn second_create_fails_without_mutation() {
        let (engine, m) = manager();
        assert!(m.create("work", None).await);
        let before = engine.invocation_count("new-session");
        assert!(!m.create("work", None).await);
        assert_eq!(engine.invocation_count("new-session"), before);
        assert_eq!(m.list().await.len(), 1);
    }

    #[tokio::test]
    async fn create_uses_initial_geometry_and_cwd() {
        let (engine, m) = manager();
        assert!(m.create("work", Some("/tmp")).await);
        let call = engine.last_invocation("new-session").unwrap();
        assert_eq!(
            call,
            vec!["new-session", "-d", "-s", "work", "-x", "120", "-y", "30", "-c", "/tmp"]
        );
        assert_eq!(engine.invocation_count("set-option"), 1);
    }

    #[tokio::test]
    async fn mouse_failure_is_not_surfaced() {
        let (engine, m) = manager();
        engine.fail_command("set-option");
        assert!(m.create("work", None).await);
    }

    #[tokio::test]
    async fn kill_absent_is_false() {
        let (engine, m) = manager();
        assert!(!m.kill("ghost").await);
        assert_eq!(engine.invocation_count("kill-session"), 0);
    }

    #[tokio::test]
    async fn kill_removes_session() {
        let (_, m) = manager();
        m.create("work", None).await;
        assert!(m.kill("work").await);
        assert!(!m.exists("work").await);
    }

    #[tokio::test]
    async fn rename_moves_session() {
        let (_, m) = manager();
        m.create("a", None).await;
        assert!(m.rename("a", "b").await);
        assert!(!m.exists("a").await);
        assert!(m.exists("b").await);
    }

    #[tokio::test]
    async fn rename_onto_existing_leaves_both() {
        let (engine, m) = manager();
        m.create("a", None).await;
        m.create("b", None).await;
        assert!(!m.rename("a", "b").await);
        assert!(m.exists("a").await);
        assert!(m.exists("b").await);
        assert_eq!(engine.invocation_count("rename-session"), 0);
    }

    #[tokio::test]
    async fn rename_missing_source_is_false() {
        let (_, m) = manager();
        assert!(!m.rename("a", "b").await);
        assert!(!m.exists("b").await);
    }

    #[tokio::test]
    async fn send_keys_appends_enter() {
        let (engine, m) = manager();
        m.create("work", None).await;
        assert!(m.send_keys("work", "ls -la").await);
        assert_eq!(
            engine.last_invocation("send-keys").unwrap(),
            vec!["send-keys", "-t", "work", "ls -la", "Enter"]
        );
    }

    #[tokio::test]
    async fn send_keys_to_absent_session_is_false() {
        let (engine, m) = manager();
        assert!(!m.send_keys("ghost", "ls").await);
        assert_eq!(engine.invocation_count("send-keys"), 0);
    }

    #[tokio::test]
    async fn ensure_default_is_idempotent() {
        let (engine, m) = manager();
        m.ensure_default(None).await;
        m.ensure_default(None).await;
        assert!(m.exists(DEFAULT_SESSION).await);
        assert_eq!(engine.invocation_count("new-session"), 1);
    }

    #[tokio::test]
    async fn ensure_default_swallows_failure() {
        let (engine, m) = manager();
        engine.fail_command("new-session");
        m.ensure_default(None).await;
        assert!(!m.exists(DEFAULT_SESSION).await);
    }
}
