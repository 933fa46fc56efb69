//! In-memory stand-in for tmux, for tests that should not need a real server.
//!
//! Understands the subset of the tmux argument grammar the bridge emits,
//! records every invocation, and attaches by running `/bin/sh`.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::gateway::{Engine, EngineOutput};
use crate::pty::PtyConfig;

#[derive(Default)]
struct FakeState {
    /// (name, created epoch seconds, attached count) in creation order
    sessions: Vec<(String, i64, u32)>,
    invocations: Vec<Vec<String>>,
    failing: HashSet<String>,
    fail_all: bool,
    clock: i64,
}

impl FakeState {
    fn position(&self, name: &str) -> Option<usize> {
        self.sessions.iter().position(|(n, _, _)| n == name)
    }
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session directly, bypassing the recorded invocations
    pub fn insert_session(&self, name: &str) {
        let mut state = self.lock();
        state.clock += 1;
        let created = 1_700_000_000 + state.clock;
        state.sessions.push((name.to_string(), created, 0));
    }

    pub fn session_names(&self) -> Vec<String> {
        self.lock()
            .sessions
            .iter()
            .map(|(n, _, _)| n.clone())
            .collect()
    }

    /// Make every invocation of `command` exit non-zero
    pub fn fail_command(&self, command: &str) {
        self.lock().failing.insert(command.to_string());
    }

    pub fn fail_all(&self, fail: bool) {
        self.lock().fail_all = fail;
    }

    pub fn invocations(&self) -> Vec<Vec<String>> {
        self.lock().invocations.clone()
    }

    pub fn invocation_count(&self, command: &str) -> usize {
        self.lock()
            .invocations
            .iter()
            .filter(|args| args.first().map(String::as_str) == Some(command))
            .count()
    }

    pub fn last_invocation(&self, command: &str) -> Option<Vec<String>> {
        self.lock()
            .invocations
            .iter()
            .rev()
            .find(|args| args.first().map(String::as_str) == Some(command))
            .cloned()
    }

    fn run(&self, args: &[&str]) -> EngineOutput {
        let mut state = self.lock();
        state
            .invocations
            .push(args.iter().map(|a| a.to_string()).collect());

        let Some(&command) = args.first() else {
            return EngineOutput::failed();
        };
        if state.fail_all || state.failing.contains(command) {
            return EngineOutput::failed();
        }

        let target = flag_value(args, "-t");
        match command {
            "list-sessions" => {
                if state.sessions.is_empty() {
                    return EngineOutput::failed();
                }
                let listing: String = state
                    .sessions
                    .iter()
                    .map(|(name, created, attached)| format!("{}:{}:{}\n", name, created, attached))
                    .collect();
                EngineOutput::ok(listing)
            }
            "has-session" | "send-keys" | "set-option" => match target {
                Some(name) if state.position(name).is_some() => EngineOutput::ok(""),
                _ => EngineOutput::failed(),
            },
            "new-session" => match flag_value(args, "-s") {
                Some(name) if state.position(name).is_none() => {
                    state.clock += 1;
                    let created = 1_700_000_000 + state.clock;
                    state.sessions.push((name.to_string(), created, 0));
                    EngineOutput::ok("")
                }
                _ => EngineOutput::failed(),
            },
            "kill-session" => match target.and_then(|name| state.position(name)) {
                Some(index) => {
                    state.sessions.remove(index);
                    EngineOutput::ok("")
                }
                None => EngineOutput::failed(),
            },
            "rename-session" => {
                let new_name = args.last().copied().unwrap_or_default();
                let index = target.and_then(|name| state.position(name));
                match index {
                    Some(index) if state.position(new_name).is_none() => {
                        state.sessions[index].0 = new_name.to_string();
                        EngineOutput::ok("")
                    }
                    _ => EngineOutput::failed(),
                }
            }
            _ => EngineOutput::failed(),
        }
    }
}

fn flag_value<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == flag)
        .and_then(|i| args.get(i + 1))
        .copied()
}

impl Engine for FakeEngine {
    async fn invoke(&self, args: &[&str]) -> EngineOutput {
        self.run(args)
    }

    fn attach_command(&self, _session: &str) -> PtyConfig {
        PtyConfig {
            command: "/bin/sh".to_string(),
            ..Default::default()
        }
    }
}
