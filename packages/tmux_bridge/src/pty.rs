use portable_pty::{ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

use crate::error::BridgeError;
use crate::gateway::ENGINE_TERM;
use crate::lifecycle::{INITIAL_COLS, INITIAL_ROWS};

/// How long a hung-up process gets before it is killed outright
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Terminal dimensions. Zero never reaches the allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub cols: u16,
    pub rows: u16,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            cols: INITIAL_COLS,
            rows: INITIAL_ROWS,
        }
    }
}

impl Geometry {
    /// Build a geometry, replacing zero dimensions with the defaults.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self::default().merge(cols, rows)
    }

    /// Apply a requested change; a zero dimension keeps the current value.
    pub fn merge(self, cols: u16, rows: u16) -> Self {
        Self {
            cols: if cols == 0 { self.cols } else { cols },
            rows: if rows == 0 { self.rows } else { rows },
        }
    }

    /// Convert a client-supplied number to a dimension, or 0 when it is not a
    /// usable positive value.
    pub fn dimension(value: f64) -> u16 {
        if value.is_finite() && value >= 1.0 {
            value.trunc().min(f64::from(u16::MAX)) as u16
        } else {
            0
        }
    }

    fn as_pty_size(self) -> PtySize {
        PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

/// Configuration for spawning a PTY
#[derive(Clone, Debug, Default)]
pub struct PtyConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<String>,
    pub env: Vec<(String, String)>,
    /// Variables removed from the inherited environment
    pub env_remove: Vec<String>,
    pub geometry: Geometry,
}

/// Point-in-time view of a PTY
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PtyState {
    pub running: bool,
    pub pid: Option<u32>,
    pub geometry: Geometry,
}

enum PtyEvent {
    Output(Vec<u8>),
    Exited(u32),
}

type DataCallback = Box<dyn FnMut(Vec<u8>) + Send>;
type ExitCallback = Box<dyn FnOnce(u32) + Send>;

/// The single data and exit subscriber of a handle. Output produced before a
/// data subscriber exists is held by the event pump.
#[derive(Default)]
struct Subscribers {
    data: Mutex<Option<DataCallback>>,
    exit: Mutex<Option<ExitCallback>>,
    data_taken: AtomicBool,
    exit_taken: AtomicBool,
    registered: Notify,
}

impl Subscribers {
    /// Hand the backlog to the data subscriber, if there is one yet.
    fn flush_data(&self, backlog: &mut Vec<Vec<u8>>) {
        let mut slot = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(callback) = slot.as_mut() {
            for chunk in backlog.drain(..) {
                callback(chunk);
            }
        }
    }

    fn has_data_subscriber(&self) -> bool {
        self.data_taken.load(Ordering::SeqCst)
    }

    fn take_exit(&self) -> Option<ExitCallback> {
        self.exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A write waiting for the writer thread
struct WriteRequest {
    data: Vec<u8>,
    respond_to: oneshot::Sender<Result<usize, BridgeError>>,
}

/// Messages that can be sent to the PTY actor
enum PtyMessage {
    Write {
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<usize, BridgeError>>,
    },
    Resize {
        cols: u16,
        rows: u16,
        respond_to: oneshot::Sender<Result<Geometry, BridgeError>>,
    },
    GetState {
        respond_to: oneshot::Sender<PtyState>,
    },
    Kill {
        respond_to: oneshot::Sender<Result<(), BridgeError>>,
    },
}

/// One live PTY-backed process.
///
/// Dropping the handle stops event delivery and shuts the actor down, which
/// releases the PTY master. Call [`PtyHandle::kill`] to terminate the process.
pub struct PtyHandle {
    pid: Option<u32>,
    sender: mpsc::Sender<PtyMessage>,
    subscribers: Arc<Subscribers>,
    _pump: DropGuard,
}

impl PtyHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write raw bytes to the terminal
    pub async fn write(&self, data: &[u8]) -> Result<usize, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::Write {
                data: data.to_vec(),
                respond_to: tx,
            })
            .await
            .map_err(|_| BridgeError::Channel("Failed to send write message".into()))?;
        rx.await
            .map_err(|_| BridgeError::Channel("Failed to receive write response".into()))?
    }

    pub async fn write_str(&self, text: &str) -> Result<usize, BridgeError> {
        self.write(text.as_bytes()).await
    }

    /// Resize the terminal. A zero dimension keeps its current value.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<Geometry, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::Resize {
                cols,
                rows,
                respond_to: tx,
            })
            .await
            .map_err(|_| BridgeError::Channel("Failed to send resize message".into()))?;
        rx.await
            .map_err(|_| BridgeError::Channel("Failed to receive resize response".into()))?
    }

    pub async fn state(&self) -> Result<PtyState, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PtyMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| BridgeError::Channel("Failed to send state message".into()))?;
        rx.await
            .map_err(|_| BridgeError::Channel("Failed to receive state response".into()))
    }

    /// Terminate the process and release the PTY. Killing a handle whose
    /// process already exited is a no-op.
    pub async fn kill(&self) -> Result<(), BridgeError> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(PtyMessage::Kill { respond_to: tx })
            .await
            .is_err()
        {
            debug!("PTY actor already stopped, nothing to kill");
            return Ok(());
        }
        rx.await
            .map_err(|_| BridgeError::Channel("Failed to receive kill response".into()))?
    }

    /// Register the subscriber for output bytes. Chunks arrive in the order
    /// the process produced them, including any produced before registration.
    pub fn on_data<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnMut(Vec<u8>) + Send + 'static,
    {
        if self.subscribers.data_taken.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::SubscriberAlreadyRegistered("data"));
        }
        *self
            .subscribers
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self.subscribers.registered.notify_one();
        Ok(())
    }

    /// Register the subscriber for the exit code. With a data subscriber
    /// registered it runs after the last output chunk has been delivered;
    /// without one, pending output is discarded and the exit still fires.
    pub fn on_exit<F>(&self, callback: F) -> Result<(), BridgeError>
    where
        F: FnOnce(u32) + Send + 'static,
    {
        if self.subscribers.exit_taken.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::SubscriberAlreadyRegistered("exit"));
        }
        *self
            .subscribers
            .exit
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
        self.subscribers.registered.notify_one();
        Ok(())
    }
}

/// The PTY actor that owns the master side of one terminal
pub struct PtyActor {
    master: Box<dyn MasterPty + Send>,
    writer: Option<mpsc::UnboundedSender<WriteRequest>>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    exited: Arc<AtomicBool>,
    state: PtyState,
    receiver: mpsc::Receiver<PtyMessage>,
}

impl PtyActor {
    /// Spawn a new PTY and return a handle to it
    pub fn spawn(config: PtyConfig) -> Result<PtyHandle, BridgeError> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(config.geometry.as_pty_size())
            .map_err(|e| BridgeError::PtyCreate(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&config.command);
        for arg in &config.args {
            cmd.arg(arg);
        }

        if let Some(dir) = &config.working_dir {
            info!("Setting working directory: {}", dir);
            cmd.cwd(dir);
        }

        cmd.env("TERM", ENGINE_TERM);
        cmd.env("COLORTERM", "truecolor");

        // Inherit PATH and other essential environment variables
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        if let Ok(home) = std::env::var("HOME") {
            cmd.env("HOME", home);
        }
        if let Ok(user) = std::env::var("USER") {
            cmd.env("USER", user);
        }

        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        for key in &config.env_remove {
            cmd.env_remove(key);
        }

        info!(
            "Spawning PTY command: {} with args: {:?}",
            config.command, config.args
        );

        let mut child = pair.slave.spawn_command(cmd).map_err(|e| {
            error!("Failed to spawn command '{}': {}", config.command, e);
            BridgeError::PtyCreate(e.to_string())
        })?;
        // The child holds its own copy; ours would keep the reader from seeing EOF
        drop(pair.slave);

        let pid = child.process_id();
        info!("PTY process started with PID: {:?}", pid);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| BridgeError::PtyCreate(format!("Failed to clone PTY reader: {}", e)))?;
        let mut writer = pair
            .master
            .take_writer()
            .map_err(|e| BridgeError::PtyCreate(format!("Failed to take PTY writer: {}", e)))?;
        let killer = child.clone_killer();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let exited = Arc::new(AtomicBool::new(false));
        let exited_flag = exited.clone();

        // Blocking reader: drain output to EOF, then reap the child so the
        // exit event always follows the last chunk.
        std::thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];
            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => {
                        info!("PTY EOF detected - process has exited");
                        break;
                    }
                    Ok(n) => {
                        let _ = event_tx.send(PtyEvent::Output(buffer[..n].to_vec()));
                    }
                    Err(e) => {
                        // EIO is how Linux reports a closed slave side
                        debug!("PTY read ended: {}", e);
                        break;
                    }
                }
            }
            let code = match child.wait() {
                Ok(status) => status.exit_code(),
                Err(e) => {
                    warn!("Failed to reap PTY child: {}", e);
                    1
                }
            };
            exited_flag.store(true, Ordering::SeqCst);
            info!("PTY process {:?} exited with code {}", pid, code);
            let _ = event_tx.send(PtyEvent::Exited(code));
        });

        // Blocking writer: a child that stops reading stdin stalls this
        // thread, never the actor, so kill and resize still get through.
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WriteRequest>();
        std::thread::spawn(move || {
            while let Some(WriteRequest { data, respond_to }) = write_rx.blocking_recv() {
                let result = writer
                    .write_all(&data)
                    .and_then(|()| writer.flush())
                    .map(|()| data.len())
                    .map_err(|e| BridgeError::Write(e.to_string()));
                let _ = respond_to.send(result);
            }
            debug!("PTY writer thread finished");
        });

        let (msg_tx, msg_rx) = mpsc::channel(32);
        let mut actor = Self {
            master: pair.master,
            writer: Some(write_tx),
            killer,
            exited,
            state: PtyState {
                running: true,
                pid,
                geometry: config.geometry,
            },
            receiver: msg_rx,
        };
        tokio::spawn(async move {
            actor.run().await;
        });

        let subscribers = Arc::new(Subscribers::default());
        let cancel = CancellationToken::new();
        tokio::spawn(pump_events(event_rx, subscribers.clone(), cancel.clone()));

        Ok(PtyHandle {
            pid,
            sender: msg_tx,
            subscribers,
            _pump: cancel.drop_guard(),
        })
    }

    async fn run(&mut self) {
        debug!("PTY actor started for PID: {:?}", self.state.pid);

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                PtyMessage::Write { data, respond_to } => {
                    self.handle_write(data, respond_to);
                }
                PtyMessage::Resize {
                    cols,
                    rows,
                    respond_to,
                } => {
                    let result = self.handle_resize(cols, rows);
                    let _ = respond_to.send(result);
                }
                PtyMessage::GetState { respond_to } => {
                    self.state.running = !self.exited.load(Ordering::SeqCst);
                    let _ = respond_to.send(self.state.clone());
                }
                PtyMessage::Kill { respond_to } => {
                    let result = self.handle_kill();
                    let _ = respond_to.send(result);
                    break;
                }
            }
        }

        // Dropping the master and writer here releases the terminal
        debug!("PTY actor shutting down for PID: {:?}", self.state.pid);
    }

    /// Queue a write; the writer thread replies once it has flushed.
    fn handle_write(
        &mut self,
        data: Vec<u8>,
        respond_to: oneshot::Sender<Result<usize, BridgeError>>,
    ) {
        let Some(writer) = self.writer.as_ref() else {
            let _ = respond_to.send(Err(BridgeError::Write("No PTY writer available".into())));
            return;
        };
        if let Err(mpsc::error::SendError(request)) = writer.send(WriteRequest { data, respond_to }) {
            let _ = request
                .respond_to
                .send(Err(BridgeError::Write("PTY writer thread stopped".into())));
        }
    }

    fn handle_resize(&mut self, cols: u16, rows: u16) -> Result<Geometry, BridgeError> {
        let geometry = self.state.geometry.merge(cols, rows);
        self.master
            .resize(geometry.as_pty_size())
            .map_err(|e| BridgeError::Resize(e.to_string()))?;

        self.state.geometry = geometry;
        Ok(geometry)
    }

    fn handle_kill(&mut self) -> Result<(), BridgeError> {
        self.state.running = false;
        self.writer = None;
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }

        // SIGHUP first: the attach client detaches cleanly on hangup
        if let Err(e) = self.killer.kill() {
            if !self.exited.load(Ordering::SeqCst) {
                return Err(BridgeError::Kill(e.to_string()));
            }
        }

        #[cfg(unix)]
        if let Some(pid) = self.state.pid {
            let exited = self.exited.clone();
            tokio::spawn(async move {
                tokio::time::sleep(KILL_GRACE).await;
                if !exited.load(Ordering::SeqCst) {
                    use nix::sys::signal::{Signal, kill};
                    use nix::unistd::Pid;

                    warn!("PTY process {} ignored SIGHUP, sending SIGKILL", pid);
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
                }
            });
        }

        Ok(())
    }
}

async fn pump_events(
    mut events: mpsc::UnboundedReceiver<PtyEvent>,
    subscribers: Arc<Subscribers>,
    cancel: CancellationToken,
) {
    let mut backlog: Vec<Vec<u8>> = Vec::new();
    let mut exit_code = None;
    loop {
        if !backlog.is_empty() {
            subscribers.flush_data(&mut backlog);
        }
        if let Some(code) = exit_code {
            // Exit waits for pending output only while someone will read it
            if backlog.is_empty() || !subscribers.has_data_subscriber() {
                if let Some(callback) = subscribers.take_exit() {
                    callback(code);
                    return;
                }
            }
        }

        tokio::select! {
            event = events.recv(), if exit_code.is_none() => match event {
                Some(PtyEvent::Output(data)) => backlog.push(data),
                Some(PtyEvent::Exited(code)) => exit_code = Some(code),
                None => return,
            },
            _ = subscribers.registered.notified() => {}
            _ = cancel.cancelled() => return,
        }
    }
}
