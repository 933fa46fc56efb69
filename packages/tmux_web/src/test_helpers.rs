use std::path::PathBuf;
use std::sync::Arc;

use tmux_bridge::testing::FakeEngine;
use tmux_bridge::{Geometry, SessionBridge, TmuxConfig};

use crate::AppState;
use crate::config::AppConfig;

pub fn test_config() -> AppConfig {
    AppConfig {
        bind_addr: ([127, 0, 0, 1], 0).into(),
        static_dir: PathBuf::from("/nonexistent/tmux-web-static"),
        theme: "Dark".to_string(),
        engine: TmuxConfig::default(),
        session_cwd: None,
        default_geometry: Geometry::default(),
    }
}

/// `AppState` backed by an in-memory engine. Must be called inside a runtime.
pub async fn test_app_state() -> (AppState, Arc<FakeEngine>) {
    test_app_state_with(test_config()).await
}

pub async fn test_app_state_with(config: AppConfig) -> (AppState, Arc<FakeEngine>) {
    let engine = Arc::new(FakeEngine::new());
    let bridge = SessionBridge::spawn(engine.clone());
    (AppState::new(bridge, config), engine)
}
