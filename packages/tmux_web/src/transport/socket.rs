use axum::{
    extract::{
        Path, Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code},
    },
    response::IntoResponse,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tmux_bridge::{Geometry, PtyHandle};

use super::framing::{InboundFrame, parse_resize_query};
use super::registry::{Binding, ConnectionId};
use crate::AppState;

pub const ATTACH_FAILED_REASON: &str = "Failed to attach session";
pub const PTY_EXITED_REASON: &str = "PTY exited";
pub const WRITE_FAILED_REASON: &str = "PTY write failed";

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Attaching,
    Streaming,
    Closing,
    Closed,
}

#[derive(Deserialize)]
pub struct WsParams {
    resize: Option<String>,
}

/// Why the streaming loop stopped
#[derive(Debug)]
enum Teardown {
    ClientGone,
    Exited(Option<u32>),
    WriteFailed,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(session): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let geometry = parse_resize_query(params.resize.as_deref(), state.config.default_geometry);
    ws.on_upgrade(move |socket| handle_socket(socket, state, session, geometry))
}

struct Connection {
    id: ConnectionId,
    session: String,
    state: ConnectionState,
}

impl Connection {
    fn transition(&mut self, next: ConnectionState) {
        debug!(conn_id = %self.id, session = %self.session, "{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

async fn close(sender: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
    let _ = sender.flush().await;
}

pub async fn handle_socket(socket: WebSocket, state: AppState, session: String, geometry: Geometry) {
    let mut conn = Connection {
        id: Uuid::new_v4(),
        session,
        state: ConnectionState::Connecting,
    };
    state.metrics.connection_opened();
    info!(
        conn_id = %conn.id,
        "WebSocket opened for session '{}' at {}x{}",
        conn.session, geometry.cols, geometry.rows
    );

    let (mut sender, receiver) = socket.split();

    conn.transition(ConnectionState::Attaching);
    let attached = state
        .bridge
        .attach(&conn.session, geometry, state.config.session_cwd.as_deref())
        .await;
    let Some(handle) = attached else {
        error!(conn_id = %conn.id, "Failed to attach session '{}'", conn.session);
        state.metrics.attach_failed();
        conn.transition(ConnectionState::Closing);
        close(&mut sender, close_code::ERROR, ATTACH_FAILED_REASON).await;
        conn.transition(ConnectionState::Closed);
        state.metrics.connection_closed();
        return;
    };
    let handle = Arc::new(handle);

    let (output_tx, output_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (exit_tx, exit_rx) = oneshot::channel::<u32>();
    if let Err(e) = handle.on_data(move |data| {
        let _ = output_tx.send(data);
    }) {
        warn!(conn_id = %conn.id, "Data subscriber not registered: {}", e);
    }
    if let Err(e) = handle.on_exit(move |code| {
        let _ = exit_tx.send(code);
    }) {
        warn!(conn_id = %conn.id, "Exit subscriber not registered: {}", e);
    }

    state
        .connections
        .insert(
            conn.id,
            Binding {
                handle: handle.clone(),
                session: conn.session.clone(),
                geometry,
            },
        )
        .await;
    let viewers = state.connections.viewers(&conn.session).await;
    info!(
        conn_id = %conn.id,
        "Streaming session '{}' ({} viewer(s))",
        conn.session, viewers
    );
    conn.transition(ConnectionState::Streaming);

    let teardown = stream(&state, &conn, &mut sender, receiver, output_rx, exit_rx).await;

    conn.transition(ConnectionState::Closing);
    state.connections.remove(&conn.id).await;
    match teardown {
        Teardown::Exited(code) => {
            info!(conn_id = %conn.id, "PTY for '{}' exited with {:?}", conn.session, code);
            state.metrics.pty_exited();
            close(&mut sender, close_code::NORMAL, PTY_EXITED_REASON).await;
        }
        Teardown::WriteFailed => {
            state.metrics.write_failed();
            kill(&conn, &handle).await;
            close(&mut sender, close_code::ERROR, WRITE_FAILED_REASON).await;
        }
        Teardown::ClientGone => {
            kill(&conn, &handle).await;
        }
    }
    conn.transition(ConnectionState::Closed);
    state.metrics.connection_closed();
    info!(conn_id = %conn.id, "WebSocket closed for session '{}'", conn.session);
}

async fn kill(conn: &Connection, handle: &PtyHandle) {
    if let Err(e) = handle.kill().await {
        warn!(conn_id = %conn.id, "Failed to kill PTY: {}", e);
    }
}

async fn stream(
    state: &AppState,
    conn: &Connection,
    sender: &mut SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut output_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut exit_rx: oneshot::Receiver<u32>,
) -> Teardown {
    loop {
        tokio::select! {
            // Output first so nothing queued is lost behind the exit
            biased;

            Some(data) = output_rx.recv() => {
                let len = data.len();
                if sender.send(Message::Binary(data.into())).await.is_err() {
                    return Teardown::ClientGone;
                }
                state.metrics.frame_sent(len);
            }
            code = &mut exit_rx => {
                while let Ok(data) = output_rx.try_recv() {
                    let len = data.len();
                    if sender.send(Message::Binary(data.into())).await.is_err() {
                        break;
                    }
                    state.metrics.frame_sent(len);
                }
                return Teardown::Exited(code.ok());
            }
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(data))) => String::from_utf8_lossy(&data).into_owned(),
                    Some(Ok(Message::Close(_))) | None => return Teardown::ClientGone,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(e)) => {
                        debug!(conn_id = %conn.id, "WebSocket error: {}", e);
                        return Teardown::ClientGone;
                    }
                };
                state.metrics.frame_received();
                if !route(state, conn, &text).await {
                    return Teardown::WriteFailed;
                }
            }
        }
    }
}

/// Apply one inbound frame. Returns false when the PTY write failed.
async fn route(state: &AppState, conn: &Connection, text: &str) -> bool {
    let Some(handle) = state.connections.handle(&conn.id).await else {
        debug!(conn_id = %conn.id, "Frame with no bound PTY ignored");
        return true;
    };
    match InboundFrame::parse(text) {
        InboundFrame::Resize { cols, rows } => {
            match handle.resize(cols, rows).await {
                Ok(geometry) => {
                    debug!(conn_id = %conn.id, "Resized to {}x{}", geometry.cols, geometry.rows)
                }
                Err(e) => warn!(conn_id = %conn.id, "Resize failed: {}", e),
            }
            true
        }
        InboundFrame::Input(input) => match handle.write_str(&input).await {
            Ok(_) => true,
            Err(e) => {
                error!(conn_id = %conn.id, "Write to PTY failed: {}", e);
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn serve(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, crate::app_router(state)).await.unwrap();
        });
        addr
    }

    async fn connect(addr: SocketAddr, path: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{}{}", addr, path)).await.unwrap();
        ws
    }

    /// Collect binary output until `done` accepts it.
    async fn read_until(ws: &mut Client, done: impl Fn(&str) -> bool) -> String {
        let mut seen = Vec::new();
        let result = timeout(Duration::from_secs(10), async {
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Binary(data) = msg {
                    seen.extend_from_slice(&data);
                    if done(&String::from_utf8_lossy(&seen)) {
                        return true;
                    }
                }
            }
            false
        })
        .await;
        let text = String::from_utf8_lossy(&seen).into_owned();
        assert_eq!(result, Ok(true), "output so far: {:?}", text);
        text
    }

    /// Read until the server closes, returning (code, reason).
    async fn read_close(ws: &mut Client) -> (u16, String) {
        timeout(Duration::from_secs(10), async {
            while let Some(Ok(msg)) = ws.next().await {
                if let WsMessage::Close(Some(frame)) = msg {
                    return (u16::from(frame.code), frame.reason.as_str().to_string());
                }
            }
            panic!("socket ended without a close frame");
        })
        .await
        .unwrap()
    }

    async fn wait_for<F, Fut>(check: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached");
    }

    fn parse_pid(output: &str) -> Option<i32> {
        output.match_indices("pid:").find_map(|(i, _)| {
            let digits: String = output[i + 4..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        })
    }

    #[tokio::test]
    async fn test_echo_round_trip() {
        let (state, engine) = crate::test_helpers::test_app_state().await;
        let addr = serve(state.clone()).await;

        let mut ws = connect(addr, "/ws/default").await;
        ws.send(WsMessage::text("echo h$((0))i\n")).await.unwrap();
        read_until(&mut ws, |out| out.contains("h0i")).await;

        // attach created the missing session
        assert_eq!(engine.session_names(), vec!["default"]);
        assert_eq!(state.connections.len().await, 1);
        let metrics = state.metrics.snapshot();
        assert_eq!(metrics.connections.active, 1);
        assert!(metrics.frames.sent >= 1);
        assert_eq!(metrics.frames.received, 1);
    }

    #[tokio::test]
    async fn test_binary_frames_are_input() {
        let (state, _) = crate::test_helpers::test_app_state().await;
        let addr = serve(state).await;

        let mut ws = connect(addr, "/ws/default").await;
        ws.send(WsMessage::binary(b"echo bin$((1+1))\n".to_vec()))
            .await
            .unwrap();
        read_until(&mut ws, |out| out.contains("bin2")).await;
    }

    #[tokio::test]
    async fn test_resize_query_and_frame() {
        let (state, _) = crate::test_helpers::test_app_state().await;
        let addr = serve(state).await;

        let mut ws = connect(addr, "/ws/default?resize=100,40").await;
        ws.send(WsMessage::text("stty size\n")).await.unwrap();
        read_until(&mut ws, |out| out.contains("40 100")).await;

        ws.send(WsMessage::text(r#"{"type":"resize","cols":90,"rows":33}"#))
            .await
            .unwrap();
        ws.send(WsMessage::text("stty size\n")).await.unwrap();
        let out = read_until(&mut ws, |out| out.contains("33 90")).await;
        // A resize frame never reaches the terminal as keystrokes
        assert!(!out.contains("resize"), "output: {:?}", out);
    }

    #[tokio::test]
    async fn test_malformed_resize_is_typed_input() {
        let (state, _) = crate::test_helpers::test_app_state().await;
        let addr = serve(state).await;

        let mut ws = connect(addr, "/ws/default").await;
        ws.send(WsMessage::text(r#"{"type":"resize","cols":"bad"}"#))
            .await
            .unwrap();
        read_until(&mut ws, |out| out.contains(r#""cols":"bad""#)).await;
    }

    #[tokio::test]
    async fn test_client_close_kills_process_and_clears_binding() {
        let (state, _) = crate::test_helpers::test_app_state().await;
        let addr = serve(state.clone()).await;

        let mut ws = connect(addr, "/ws/default").await;
        ws.send(WsMessage::text("echo pid:$$\n")).await.unwrap();
        let out = read_until(&mut ws, |out| parse_pid(out).is_some()).await;
        let pid = parse_pid(&out).unwrap();
        assert_eq!(state.connections.len().await, 1);

        drop(ws);

        let st = &state;
        wait_for(|| async move { st.connections.is_empty().await }).await;
        let pid = nix::unistd::Pid::from_raw(pid);
        wait_for(|| async move { nix::sys::signal::kill(pid, None).is_err() }).await;
        wait_for(|| async move { st.metrics.snapshot().connections.active == 0 }).await;
    }

    #[tokio::test]
    async fn test_process_exit_closes_normally() {
        let (state, _) = crate::test_helpers::test_app_state().await;
        let addr = serve(state.clone()).await;

        let mut ws = connect(addr, "/ws/default").await;
        ws.send(WsMessage::text("exit 0\n")).await.unwrap();
        let (code, reason) = read_close(&mut ws).await;
        assert_eq!(code, 1000);
        assert_eq!(reason, PTY_EXITED_REASON);

        let st = &state;
        wait_for(|| async move { st.connections.is_empty().await }).await;
        assert_eq!(state.metrics.snapshot().pty.exits, 1);
    }

    #[tokio::test]
    async fn test_attach_failure_closes_with_error() {
        let (state, engine) = crate::test_helpers::test_app_state().await;
        engine.fail_command("new-session");
        let addr = serve(state.clone()).await;

        let mut ws = connect(addr, "/ws/ghost").await;
        let (code, reason) = read_close(&mut ws).await;
        assert_eq!(code, 1011);
        assert_eq!(reason, ATTACH_FAILED_REASON);
        assert!(state.connections.is_empty().await);
        assert_eq!(state.metrics.snapshot().connections.attach_failures, 1);
    }

    #[tokio::test]
    async fn test_viewers_share_a_session() {
        let (state, engine) = crate::test_helpers::test_app_state().await;
        let addr = serve(state.clone()).await;

        let mut first = connect(addr, "/ws/shared").await;
        let mut second = connect(addr, "/ws/shared").await;
        first.send(WsMessage::text("echo one-$((1))\n")).await.unwrap();
        second.send(WsMessage::text("echo two-$((2))\n")).await.unwrap();
        read_until(&mut first, |out| out.contains("one-1")).await;
        read_until(&mut second, |out| out.contains("two-2")).await;

        assert_eq!(state.connections.viewers("shared").await, 2);
        assert_eq!(engine.invocation_count("new-session"), 1);
    }
}
