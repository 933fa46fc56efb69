//! Process gateway: runs engine control commands and reports their outcome.
//!
//! A non-zero exit is never an error at this layer. Callers get
//! `succeeded: false` and decide what it means, usually by checking for the
//! session's existence before issuing the mutating command.

use std::future::Future;
use std::process::Stdio;
use tracing::{debug, info, warn};

use crate::error::BridgeError;
use crate::pty::PtyConfig;

/// Terminal type forced on every engine child for stable output formatting
pub const ENGINE_TERM: &str = "xterm-256color";

/// Outcome of one engine invocation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineOutput {
    pub succeeded: bool,
    pub output: String,
}

impl EngineOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }
}

/// The narrow slice of the multiplexing engine the bridge depends on.
pub trait Engine: Send + Sync + 'static {
    /// Run one control command with the given arguments.
    fn invoke(&self, args: &[&str]) -> impl Future<Output = EngineOutput> + Send;

    /// Command line that attaches a client to `session` inside a PTY.
    fn attach_command(&self, session: &str) -> PtyConfig;
}

/// Settings for locating and addressing the tmux server
#[derive(Clone, Debug)]
pub struct TmuxConfig {
    pub program: String,
    /// Dedicated server socket name, passed as `-L <name>`
    pub socket_name: Option<String>,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            program: "tmux".to_string(),
            socket_name: None,
        }
    }
}

/// Engine backed by the real tmux binary
#[derive(Clone, Debug)]
pub struct TmuxEngine {
    config: TmuxConfig,
}

impl TmuxEngine {
    /// Verify the binary runs before handing out an engine.
    pub async fn locate(config: TmuxConfig) -> Result<Self, BridgeError> {
        let output = tokio::process::Command::new(&config.program)
            .arg("-V")
            .env("TERM", ENGINE_TERM)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BridgeError::EngineUnavailable {
                program: config.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BridgeError::EngineUnavailable {
                program: config.program.clone(),
                reason: format!("'-V' exited with {}", output.status),
            });
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Using {} ({})", config.program, version);
        Ok(Self { config })
    }

    fn full_args<'a>(&'a self, args: &[&'a str]) -> Vec<&'a str> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(socket) = &self.config.socket_name {
            full.push("-L");
            full.push(socket.as_str());
        }
        full.extend_from_slice(args);
        full
    }
}

impl Engine for TmuxEngine {
    async fn invoke(&self, args: &[&str]) -> EngineOutput {
        let full = self.full_args(args);
        debug!("{} {:?}", self.config.program, full);

        let result = tokio::process::Command::new(&self.config.program)
            .args(&full)
            .env("TERM", ENGINE_TERM)
            .stdin(Stdio::null())
            .output()
            .await;

        match result {
            Ok(output) => EngineOutput {
                succeeded: output.status.success(),
                output: String::from_utf8_lossy(&output.stdout).to_string(),
            },
            Err(e) => {
                warn!("Failed to run {}: {}", self.config.program, e);
                EngineOutput::failed()
            }
        }
    }

    fn attach_command(&self, session: &str) -> PtyConfig {
        let args = self
            .full_args(&["attach", "-t", session])
            .into_iter()
            .map(str::to_string)
            .collect();
        PtyConfig {
            command: self.config.program.clone(),
            args,
            // attaching from inside another tmux client is refused otherwise
            env_remove: vec!["TMUX".to_string()],
            ..Default::default()
        }
    }
}
