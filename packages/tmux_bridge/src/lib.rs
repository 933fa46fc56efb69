//! tmux bridge - named tmux sessions as PTY-backed byte streams
//!
//! This crate owns everything between a caller and the tmux server: running
//! control commands, reading the session namespace, the create/kill/rename
//! lifecycle, and spawning `tmux attach` clients inside PTYs. It has no HTTP
//! dependencies.
//!
//! All session operations go through a [`SessionBridge`], a cloneable handle
//! to one task that runs them in order.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tmux_bridge::{Geometry, SessionBridge, TmuxConfig, TmuxEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = TmuxEngine::locate(TmuxConfig::default()).await.unwrap();
//!     let bridge = SessionBridge::spawn(Arc::new(engine));
//!     bridge.ensure_default(None).await;
//!
//!     let handle = bridge
//!         .attach("default", Geometry::default(), None)
//!         .await
//!         .unwrap();
//!     handle
//!         .on_data(|data| print!("{}", String::from_utf8_lossy(&data)))
//!         .unwrap();
//!     handle.write_str("echo hello\n").await.unwrap();
//! }
//! ```

pub mod bridge;
mod error;
pub mod gateway;
pub mod lifecycle;
pub mod pty;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{BridgeCommand, SessionBridge};
pub use error::BridgeError;
pub use gateway::{Engine, EngineOutput, TmuxConfig, TmuxEngine};
pub use lifecycle::{DEFAULT_SESSION, INITIAL_COLS, INITIAL_ROWS, LifecycleManager};
pub use pty::{Geometry, PtyActor, PtyConfig, PtyHandle, PtyState};
pub use registry::{Session, SessionRegistry};
