use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::warn;

use tmux_bridge::{Geometry, INITIAL_COLS, INITIAL_ROWS, TmuxConfig};

// =============================================================================
// File config (figment-deserialized from defaults / tmux-web.toml / env vars)
// =============================================================================
//
//   tmux-web.toml:   [server]
//                    port = 8080
//
//   env var:         TMUX_WEB_SERVER__PORT=8080   (double underscore = nesting)
//
//   legacy:          PORT=8080

/// Config file read from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "tmux-web.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub ui: UiFileConfig,
    #[serde(default)]
    pub engine: EngineFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Listener and static assets (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// Browser-facing settings (lives under `[ui]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UiFileConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for UiFileConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
        }
    }
}

/// How to reach tmux (lives under `[engine]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineFileConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Private server socket, passed to tmux as `-L <name>`
    #[serde(default)]
    pub socket_name: Option<String>,
}

impl Default for EngineFileConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            socket_name: None,
        }
    }
}

/// New-session defaults (lives under `[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    /// Working directory for sessions created by the server.
    /// Defaults to the server's own working directory.
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_cols")]
    pub default_cols: u16,
    #[serde(default = "default_rows")]
    pub default_rows: u16,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            default_cols: default_cols(),
            default_rows: default_rows(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    7681
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("public")
}
fn default_theme() -> String {
    "Dark".to_string()
}
fn default_program() -> String {
    "tmux".to_string()
}
fn default_cols() -> u16 {
    INITIAL_COLS
}
fn default_rows() -> u16 {
    INITIAL_ROWS
}

/// Build a figment that layers: defaults → config file → TMUX_WEB_* env vars → PORT.
///
/// A missing config file is not an error.
///   `TMUX_WEB_ENGINE__SOCKET_NAME=web`  →  `engine.socket_name = "web"`
pub fn load_config(config_file: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let figment = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("TMUX_WEB_").split("__"));
    match legacy_port() {
        Some(port) => figment.merge(Serialized::default("server.port", port)),
        None => figment,
    }
}

/// `PORT`, when it holds a usable port number. Anything else is ignored.
fn legacy_port() -> Option<u16> {
    let raw = std::env::var("PORT").ok()?;
    match raw.trim().parse::<u16>() {
        Ok(port) => Some(port),
        Err(e) => {
            warn!("Ignoring PORT={:?}: {}", raw, e);
            None
        }
    }
}

// =============================================================================
// Command line
// =============================================================================

#[derive(Parser, Debug, Default)]
#[command(name = "tmux-web")]
#[command(about = "Serve tmux sessions to the browser over WebSocket")]
pub struct Cli {
    /// Port for the HTTP server
    #[arg(short, long)]
    pub port: Option<u16>,

    /// UI theme name reported to clients
    #[arg(short, long)]
    pub theme: Option<String>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    pub host: Option<String>,

    /// Directory served for paths that match no route
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Config file (defaults to ./tmux-web.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn config_file(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Flags win over every other layer.
    pub fn apply(&self, fc: &mut FileConfig) {
        if let Some(port) = self.port {
            fc.server.port = port;
        }
        if let Some(host) = &self.host {
            fc.server.host = host.clone();
        }
        if let Some(dir) = &self.static_dir {
            fc.server.static_dir = dir.clone();
        }
        if let Some(theme) = &self.theme {
            fc.ui.theme = theme.clone();
        }
    }
}

// =============================================================================
// Runtime config (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub static_dir: PathBuf,
    pub theme: String,
    pub engine: TmuxConfig,
    /// Working directory handed to `new-session -c`
    pub session_cwd: Option<String>,
    /// Attach geometry when the client sends none
    pub default_geometry: Geometry,
}

impl AppConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        let bind_addr = format!("{}:{}", fc.server.host, fc.server.port)
            .parse::<SocketAddr>()
            .with_context(|| {
                format!("Invalid listen address {}:{}", fc.server.host, fc.server.port)
            })?;

        let session_cwd = fc
            .session
            .cwd
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .map(|dir| dir.to_string_lossy().into_owned());

        Ok(Self {
            bind_addr,
            static_dir: fc.server.static_dir.clone(),
            theme: fc.ui.theme.clone(),
            engine: TmuxConfig {
                program: fc.engine.program.clone(),
                socket_name: fc.engine.socket_name.clone(),
            },
            session_cwd,
            default_geometry: Geometry::new(fc.session.default_cols, fc.session.default_rows),
        })
    }

    /// Resolve every layer for the given command line.
    pub fn load(cli: &Cli) -> Result<Self> {
        let path = cli.config_file();
        let mut fc: FileConfig = load_config(&path)
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        cli.apply(&mut fc);
        Self::from_file(&fc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.server.host, "0.0.0.0");
        assert_eq!(fc.server.port, 7681);
        assert_eq!(fc.server.static_dir, PathBuf::from("public"));
        assert_eq!(fc.ui.theme, "Dark");
        assert_eq!(fc.engine.program, "tmux");
        assert!(fc.engine.socket_name.is_none());
        assert_eq!(fc.session.default_cols, 120);
        assert_eq!(fc.session.default_rows, 30);
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let fc: FileConfig = load_config(Path::new("absent.toml")).extract()?;
            assert_eq!(fc.server.port, 7681);
            assert_eq!(fc.ui.theme, "Dark");
            Ok(())
        });
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                "[server]\nport = 9000\n[ui]\ntheme = \"Light\"\n[engine]\nsocket_name = \"web\"\n",
            )?;
            let fc: FileConfig = load_config(Path::new("custom.toml")).extract()?;
            assert_eq!(fc.server.port, 9000);
            assert_eq!(fc.server.host, "0.0.0.0");
            assert_eq!(fc.ui.theme, "Light");
            assert_eq!(fc.engine.socket_name.as_deref(), Some("web"));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("tmux-web.toml", "[server]\nport = 9000\n")?;
            jail.set_env("TMUX_WEB_SERVER__PORT", "9100");
            jail.set_env("TMUX_WEB_UI__THEME", "Solarized");
            let fc: FileConfig = load_config(Path::new("tmux-web.toml")).extract()?;
            assert_eq!(fc.server.port, 9100);
            assert_eq!(fc.ui.theme, "Solarized");
            Ok(())
        });
    }

    #[test]
    fn test_legacy_port_wins_over_prefixed_env() {
        Jail::expect_with(|jail| {
            jail.set_env("TMUX_WEB_SERVER__PORT", "9100");
            jail.set_env("PORT", "9200");
            let fc: FileConfig = load_config(Path::new("tmux-web.toml")).extract()?;
            assert_eq!(fc.server.port, 9200);
            Ok(())
        });
    }

    #[test]
    fn test_unparsable_legacy_port_is_ignored() {
        Jail::expect_with(|jail| {
            jail.set_env("PORT", "abc");
            let fc: FileConfig = load_config(Path::new("tmux-web.toml")).extract()?;
            assert_eq!(fc.server.port, 7681);

            jail.set_env("TMUX_WEB_SERVER__PORT", "9100");
            let fc: FileConfig = load_config(Path::new("tmux-web.toml")).extract()?;
            assert_eq!(fc.server.port, 9100);
            Ok(())
        });
    }

    #[test]
    fn test_cli_flags_win() {
        let cli = Cli::parse_from([
            "tmux-web",
            "-p",
            "8080",
            "-t",
            "Light",
            "-b",
            "127.0.0.1",
            "--static-dir",
            "/srv/www",
        ]);
        let mut fc = FileConfig::default();
        fc.server.port = 9000;
        cli.apply(&mut fc);
        assert_eq!(fc.server.port, 8080);
        assert_eq!(fc.server.host, "127.0.0.1");
        assert_eq!(fc.server.static_dir, PathBuf::from("/srv/www"));
        assert_eq!(fc.ui.theme, "Light");
    }

    #[test]
    fn test_cli_without_flags_changes_nothing() {
        let cli = Cli::parse_from(["tmux-web"]);
        let mut fc = FileConfig::default();
        fc.server.port = 9000;
        cli.apply(&mut fc);
        assert_eq!(fc.server.port, 9000);
        assert_eq!(cli.config_file(), PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_app_config_from_file() {
        let mut fc = FileConfig::default();
        fc.session.cwd = Some(PathBuf::from("/tmp"));
        fc.session.default_cols = 0;
        fc.engine.socket_name = Some("web".into());
        let config = AppConfig::from_file(&fc).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:7681".parse::<SocketAddr>().unwrap());
        assert_eq!(config.session_cwd.as_deref(), Some("/tmp"));
        assert_eq!(config.engine.socket_name.as_deref(), Some("web"));
        // zero falls back to the built-in default
        assert_eq!(config.default_geometry, Geometry { cols: 120, rows: 30 });
    }

    #[test]
    fn test_app_config_rejects_bad_host() {
        let mut fc = FileConfig::default();
        fc.server.host = "not a host".into();
        assert!(AppConfig::from_file(&fc).is_err());
    }
}
