use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::gateway::Engine;

/// Field template handed to `list-sessions -F`
pub const LIST_FORMAT: &str = "#{session_name}:#{session_created}:#{session_attached}";

/// Snapshot of one engine session. Never cached across calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Session {
    pub name: String,
    pub created: DateTime<Utc>,
    /// Viewer count as reported by the engine; informational only
    pub attached: u32,
}

/// Read-through queries against the engine's session namespace
pub struct SessionRegistry<E> {
    engine: Arc<E>,
}

impl<E: Engine> SessionRegistry<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// List sessions in engine order. A failed listing (including "no server
    /// running") yields an empty list.
    pub async fn list(&self) -> Vec<Session> {
        let out = self
            .engine
            .invoke(&["list-sessions", "-F", LIST_FORMAT])
            .await;
        if !out.succeeded {
            return Vec::new();
        }
        parse_session_list(&out.output)
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.engine
            .invoke(&["has-session", "-t", name])
            .await
            .succeeded
    }
}

pub fn parse_session_list(output: &str) -> Vec<Session> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_session_line)
        .collect()
}

fn parse_session_line(line: &str) -> Session {
    let mut parts = line.split(':');
    let name = parts.next().unwrap_or_default().to_string();
    let created = parts
        .next()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let attached = parts
        .next()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0);

    Session {
        name,
        created,
        attached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    #[test]
    fn parses_listing_lines() {
        let sessions = parse_session_list("default:1700000000:1\nwork:1700000100:0\n");
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].name, "default");
        assert_eq!(sessions[0].created.timestamp(), 1_700_000_000);
        assert_eq!(sessions[0].attached, 1);
        assert_eq!(sessions[1].name, "work");
        assert_eq!(sessions[1].attached, 0);
    }

    #[test]
    fn skips_blank_lines() {
        let sessions = parse_session_list("\n\na:1:0\n\n");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name, "a");
    }

    #[test]
    fn bad_attached_count_defaults_to_zero() {
        let sessions = parse_session_list("a:1700000000:lots");
        assert_eq!(sessions[0].attached, 0);
    }

    #[test]
    fn bad_timestamp_falls_back_to_epoch() {
        let sessions = parse_session_list("a:yesterday:2");
        assert_eq!(sessions[0].created, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(sessions[0].attached, 2);
    }

    #[test]
    fn session_serializes_created_as_rfc3339() {
        let s = parse_session_list("a:0:3").remove(0);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["name"], "a");
        assert_eq!(json["created"], "1970-01-01T00:00:00Z");
        assert_eq!(json["attached"], 3);
    }

    #[tokio::test]
    async fn list_is_empty_when_engine_fails() {
        let engine = Arc::new(FakeEngine::new());
        engine.fail_all(true);
        let registry = SessionRegistry::new(engine);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn list_preserves_engine_order() {
        let engine = Arc::new(FakeEngine::new());
        engine.insert_session("zeta");
        engine.insert_session("alpha");
        let registry = SessionRegistry::new(engine);
        let names: Vec<_> = registry.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn exists_follows_engine() {
        let engine = Arc::new(FakeEngine::new());
        engine.insert_session("present");
        let registry = SessionRegistry::new(engine);
        assert!(registry.exists("present").await);
        assert!(!registry.exists("absent").await);
    }
}
