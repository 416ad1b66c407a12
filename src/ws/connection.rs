//! WebSocket connection tasks.
//!
//! Each upgraded socket is split in two. A writer task owns the sink and
//! drains the socket's [`SocketReceiver`]; the reader loop runs in the
//! upgrade task, feeds inbound frames to the relay, sends keepalive pings,
//! and enforces the idle timeout. Whichever side finishes first closes the
//! [`SocketHandle`], which stops the other.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::app_state::AppState;
use crate::config::HubConfig;
use crate::relay::{AcceptedDevice, Outbound, SocketHandle, SocketReceiver, close_code};

/// Keepalive timing applied to every relay socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Interval between hub pings, if enabled.
    pub ping_interval: Option<Duration>,
    /// Inactivity after which the socket is closed, if enabled.
    pub idle_timeout: Option<Duration>,
}

impl From<&HubConfig> for Keepalive {
    fn from(config: &HubConfig) -> Self {
        Self {
            ping_interval: config.ping_interval(),
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Drains queued frames into the socket until the handle is closed or
/// the peer goes away. On close, the close frame is sent last.
pub async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut rx: SocketReceiver) {
    loop {
        tokio::select! {
            biased;
            frame = rx.outbound.recv() => {
                let message = match frame {
                    Some(Outbound::Text(text)) => Message::text(text),
                    Some(Outbound::Ping) => Message::Ping(Bytes::new()),
                    None => break,
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            changed = rx.close.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(signal) = rx.close_signal() {
                    let frame = CloseFrame {
                        code: signal.code,
                        reason: signal.reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Reads inbound frames until the peer leaves, the handle is closed, or
/// the idle timeout fires.
///
/// `on_text` receives each text frame. `on_activity` is called for
/// control frames so that liveness bookkeeping sees them too.
async fn read_loop<T, A>(
    mut stream: SplitStream<WebSocket>,
    handle: &SocketHandle,
    keepalive: Keepalive,
    mut on_text: T,
    mut on_activity: A,
) where
    T: FnMut(&str),
    A: FnMut(),
{
    let mut ping = keepalive.ping_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });
    let idle_deadline = || keepalive.idle_timeout.map(|d| Instant::now() + d);
    let mut deadline = idle_deadline();

    loop {
        tokio::select! {
            () = handle.closed() => break,
            () = next_tick(&mut ping) => {
                handle.ping();
            }
            () = sleep_until(deadline) => {
                tracing::info!("closing idle socket");
                handle.close(close_code::IDLE_TIMEOUT, "Idle timeout");
                break;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => on_text(text.as_str()),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => on_activity(),
                    Some(Ok(Message::Binary(_))) => {
                        tracing::debug!("ignoring binary frame");
                        on_activity();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "socket read failed");
                        break;
                    }
                }
                deadline = idle_deadline();
            }
        }
    }
}

/// Runs a device connection from handshake to teardown.
pub async fn run_device(
    socket: WebSocket,
    state: AppState,
    id: Option<String>,
    key: Option<String>,
    firmware: Option<String>,
) {
    let (sink, stream) = socket.split();
    let (handle, rx) = SocketHandle::channel(state.config.ws_outbound_capacity);
    let writer = tokio::spawn(write_loop(sink, rx));
    let relay = Arc::clone(&state.relay);

    let Ok(AcceptedDevice {
        device_id,
        connection_id,
    }) = relay
        .accept(id.as_deref(), key.as_deref(), firmware.as_deref(), handle.clone())
        .await
    else {
        let _ = writer.await;
        return;
    };

    read_loop(
        stream,
        &handle,
        Keepalive::from(state.config.as_ref()),
        |text| {
            relay.on_message(&device_id, connection_id, text);
        },
        || relay.touch(&device_id, connection_id),
    )
    .await;

    relay.disconnect(&device_id, connection_id).await;
    handle.close(close_code::NORMAL, "");
    let _ = writer.await;
}

/// Runs a client connection from handshake to teardown.
pub async fn run_client(
    socket: WebSocket,
    state: AppState,
    token: Option<String>,
    device: Option<String>,
) {
    let (sink, stream) = socket.split();
    let (handle, rx) = SocketHandle::channel(state.config.ws_outbound_capacity);
    let writer = tokio::spawn(write_loop(sink, rx));
    let proxy = Arc::clone(&state.proxy);

    let Ok(session) = proxy
        .accept(token.as_deref(), device.as_deref(), handle.clone())
        .await
    else {
        let _ = writer.await;
        return;
    };

    read_loop(
        stream,
        &handle,
        Keepalive::from(state.config.as_ref()),
        |text| {
            proxy.on_message(&session, text);
        },
        || {},
    )
    .await;

    proxy.disconnect(session.session_id);
    handle.close(close_code::NORMAL, "");
    let _ = writer.await;
}
