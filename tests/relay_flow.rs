//! End-to-end relay behaviour over real sockets.

#![allow(clippy::panic)]

mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use common::{DEVICE, OWNER, hub, serve, token};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug)]
enum Frame {
    Json(Value),
    Closed(Option<u16>),
}

async fn connect(url: String) -> Socket {
    let Ok((socket, _)) = connect_async(url).await else {
        panic!("websocket handshake failed");
    };
    socket
}

async fn next_frame(socket: &mut Socket) -> Frame {
    loop {
        let Ok(next) = tokio::time::timeout(Duration::from_secs(5), socket.next()).await else {
            panic!("timed out waiting for a frame");
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                let Ok(value) = serde_json::from_str(text.as_str()) else {
                    panic!("non-json text frame: {text}");
                };
                return Frame::Json(value);
            }
            Some(Ok(Message::Close(frame))) => {
                return Frame::Closed(frame.map(|f| u16::from(f.code)));
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return Frame::Closed(None),
        }
    }
}

async fn next_json(socket: &mut Socket) -> Value {
    match next_frame(socket).await {
        Frame::Json(value) => value,
        Frame::Closed(code) => panic!("socket closed with {code:?}"),
    }
}

async fn close_code(socket: &mut Socket) -> Option<u16> {
    match next_frame(socket).await {
        Frame::Closed(code) => code,
        Frame::Json(value) => panic!("expected close, got {value}"),
    }
}

async fn send_json(socket: &mut Socket, value: &Value) {
    let Ok(()) = socket.send(Message::text(value.to_string())).await else {
        panic!("send failed");
    };
}

fn device_url(addr: std::net::SocketAddr) -> String {
    format!("ws://{addr}/ws/device?id={DEVICE}&key=device-secret")
}

fn client_url(addr: std::net::SocketAddr, path: &str, token: &str) -> String {
    format!("ws://{addr}{path}?token={token}&device={DEVICE}")
}

#[tokio::test]
async fn command_and_status_round_trip() {
    let hub = hub(false).await;
    let addr = serve(&hub).await;

    let mut device = connect(device_url(addr)).await;
    assert_eq!(next_json(&mut device).await["type"], "connected");

    let mut client = connect(client_url(addr, "/ws/client", &token(&hub, "user-9"))).await;
    let hello = next_json(&mut client).await;
    assert_eq!(hello["type"], "connected");
    assert_eq!(hello["deviceId"], DEVICE);
    assert_eq!(hello["deviceOnline"], true);
    assert!(hello["sessionId"].is_string());

    send_json(&mut client, &json!({"type": "command", "cmd": "brew"})).await;
    let command = next_json(&mut device).await;
    assert_eq!(command["type"], "command");
    assert_eq!(command["cmd"], "brew");
    assert!(command["timestamp"].is_i64());

    send_json(&mut device, &json!({"type": "status", "temp": 93.5})).await;
    let status = next_json(&mut client).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["temp"], 93.5);
    assert_eq!(status["deviceId"], DEVICE);
    assert!(status["timestamp"].is_i64());

    send_json(
        &mut device,
        &json!({"type": "status", "temp": 94.0, "deviceId": "BRW-FFFFFFFF"}),
    )
    .await;
    let relabelled = next_json(&mut client).await;
    assert_eq!(relabelled["deviceId"], "BRW-FFFFFFFF");

    let Ok(()) = device.close(None).await else {
        panic!("device close failed");
    };
    let offline = next_json(&mut client).await;
    assert_eq!(offline["type"], "device_offline");
    assert_eq!(offline["deviceId"], DEVICE);

    send_json(&mut client, &json!({"type": "command", "cmd": "brew"})).await;
    let error = next_json(&mut client).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["error"], "device_offline");
}

#[tokio::test]
async fn every_client_gets_the_same_frame() {
    let hub = hub(false).await;
    let addr = serve(&hub).await;

    let mut device = connect(device_url(addr)).await;
    next_json(&mut device).await;
    let mut first = connect(client_url(addr, "/ws/client", &token(&hub, "a"))).await;
    next_json(&mut first).await;
    let mut second = connect(client_url(addr, "/ws", &token(&hub, "b"))).await;
    next_json(&mut second).await;

    send_json(&mut device, &json!({"type": "shot", "seconds": 27})).await;
    let a = next_json(&mut first).await;
    let b = next_json(&mut second).await;
    assert_eq!(a, b);
    assert_eq!(a["seconds"], 27);
}

#[tokio::test]
async fn device_without_key_is_closed_4001() {
    let hub = hub(false).await;
    let addr = serve(&hub).await;
    let mut device = connect(format!("ws://{addr}/ws/device?id={DEVICE}")).await;
    assert_eq!(close_code(&mut device).await, Some(4001));
}

#[tokio::test]
async fn bad_token_is_closed_4002() {
    let hub = hub(false).await;
    let addr = serve(&hub).await;
    let mut client = connect(client_url(addr, "/ws/client", "not-a-jwt")).await;
    assert_eq!(close_code(&mut client).await, Some(4002));
}

#[tokio::test]
async fn non_owner_is_closed_4003() {
    let hub = hub(true).await;
    let addr = serve(&hub).await;

    let mut intruder = connect(client_url(addr, "/ws/client", &token(&hub, "intruder"))).await;
    assert_eq!(close_code(&mut intruder).await, Some(4003));

    let mut owner = connect(client_url(addr, "/ws/client", &token(&hub, OWNER))).await;
    assert_eq!(next_json(&mut owner).await["type"], "connected");
}

#[tokio::test]
async fn newer_device_connection_replaces_older() {
    let hub = hub(false).await;
    let addr = serve(&hub).await;

    let mut old = connect(device_url(addr)).await;
    next_json(&mut old).await;
    let mut new = connect(device_url(addr)).await;
    next_json(&mut new).await;
    assert_eq!(close_code(&mut old).await, Some(4002));

    let mut client = connect(client_url(addr, "/ws/client", &token(&hub, "u"))).await;
    next_json(&mut client).await;
    send_json(&mut client, &json!({"type": "command", "cmd": "ping"})).await;
    assert_eq!(next_json(&mut new).await["cmd"], "ping");
}

#[tokio::test]
async fn health_counts_live_connections() {
    let hub = hub(false).await;
    let addr = serve(&hub).await;

    let mut device = connect(device_url(addr)).await;
    next_json(&mut device).await;
    let mut client = connect(client_url(addr, "/ws/client", &token(&hub, "u"))).await;
    next_json(&mut client).await;

    let Ok(response) = reqwest::get(format!("http://{addr}/api/health")).await else {
        panic!("health request failed");
    };
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let Ok(body) = response.json::<Value>().await else {
        panic!("health body");
    };
    assert_eq!(body["status"], "ok");
    assert_eq!(body["devices"], 1);
    assert_eq!(body["clients"], 1);
}

#[tokio::test]
async fn device_listing_is_scoped_to_owner() {
    let hub = hub(true).await;
    let addr = serve(&hub).await;
    let mut device = connect(device_url(addr)).await;
    next_json(&mut device).await;

    let http = reqwest::Client::new();
    for (user, expected) in [(OWNER, 1), ("stranger", 0)] {
        let Ok(response) = http
            .get(format!("http://{addr}/api/devices/connected"))
            .bearer_auth(token(&hub, user))
            .send()
            .await
        else {
            panic!("devices request failed");
        };
        let Ok(body) = response.json::<Value>().await else {
            panic!("devices body");
        };
        assert_eq!(body["devices"].as_array().map(Vec::len), Some(expected), "{user}");
    }
}

async fn owned_devices(http: &reqwest::Client, addr: std::net::SocketAddr, bearer: &str) -> Value {
    let Ok(response) = http
        .get(format!("http://{addr}/api/devices"))
        .bearer_auth(bearer)
        .send()
        .await
    else {
        panic!("devices request failed");
    };
    let Ok(body) = response.json::<Value>().await else {
        panic!("devices body");
    };
    body
}

#[tokio::test]
async fn owned_devices_track_connection_state() {
    let hub = hub(true).await;
    let addr = serve(&hub).await;
    let http = reqwest::Client::new();
    let bearer = token(&hub, OWNER);

    let before = owned_devices(&http, addr, &bearer).await;
    assert_eq!(before["devices"][0]["id"], DEVICE);
    assert_eq!(before["devices"][0]["isOnline"], false);

    let mut device = connect(format!("{}&firmware=1.4.2", device_url(addr))).await;
    next_json(&mut device).await;
    let during = owned_devices(&http, addr, &bearer).await;
    assert_eq!(during["devices"][0]["isOnline"], true);
    assert_eq!(during["devices"][0]["firmwareVersion"], "1.4.2");

    let Ok(()) = device.close(None).await else {
        panic!("device close failed");
    };
    let mut stored_online = true;
    for _ in 0..50 {
        let Some(record) = hub.store.device(&common::device()).await else {
            panic!("device row");
        };
        stored_online = record.is_online;
        if !stored_online {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!stored_online);
    let after = owned_devices(&http, addr, &bearer).await;
    assert_eq!(after["devices"][0]["isOnline"], false);
}
