pub mod health;
pub mod sessions;

// Re-export all handlers for easy route registration
pub use health::{config_handler, health_handler, metrics_handler};
pub use sessions::{
    create_session, delete_session, exec_command, list_sessions, rename_session,
};
