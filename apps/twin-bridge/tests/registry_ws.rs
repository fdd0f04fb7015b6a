//! Registry WebSocket Client Integration Tests
//!
//! A local `tokio-tungstenite` server plays the registry: it records the
//! commands the client sends and pushes event frames back.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use twin_bridge::application::ports::RegistryEventHandler;
use twin_bridge::domain::events::RegistryEvent;
use twin_bridge::infrastructure::config::DittoSettings;
use twin_bridge::infrastructure::registry::{
    ConnectionState, HandlerKey, RegistryClientError, RegistryWsClient, RegistryWsConfig,
};

const WAIT: Duration = Duration::from_secs(3);

struct Forward(mpsc::UnboundedSender<RegistryEvent>);

#[async_trait]
impl RegistryEventHandler for Forward {
    async fn on_event(&self, event: &RegistryEvent) {
        let _ = self.0.send(event.clone());
    }
}

fn client_for(addr: std::net::SocketAddr) -> Arc<RegistryWsClient> {
    let settings = DittoSettings {
        url: format!("http://{addr}"),
        username: "ditto".to_string(),
        password: "ditto".to_string(),
        api_token: String::new(),
    };
    let mut config = RegistryWsConfig::from_settings(&settings).unwrap();
    config.reconnect.initial_delay = Duration::from_millis(20);
    Arc::new(RegistryWsClient::new(config, CancellationToken::new()))
}

async fn next_text<S>(stream: &mut S) -> String
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match timeout(WAIT, stream.next()).await.unwrap().unwrap().unwrap() {
            Message::Text(text) => return text.as_str().to_string(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

#[tokio::test]
async fn subscribes_dispatches_and_closes_normally() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (auth_tx, auth_rx) = oneshot::channel();
    let (close_tx, close_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            tcp,
            |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                let auth = req
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = auth_tx.send(auth);
                Ok(resp)
            },
        )
        .await
        .unwrap();

        let command: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
        assert_eq!(command["type"], "START-SEND-EVENTS");
        assert_eq!(command["payload"]["topic"], "/_/things/twin/events");

        ws.send(Message::Text("START-SEND-EVENTS:ACK".into()))
            .await
            .unwrap();
        let frame = json!({
            "topic": "/ns/twinA/things/twin/events/modified",
            "path": "/features/temp/properties/value",
            "value": 42.5,
            "timestamp": "2024-01-01T00:00:00Z"
        });
        ws.send(Message::Text(frame.to_string().into()))
            .await
            .unwrap();

        while let Some(Ok(message)) = ws.next().await {
            if let Message::Close(frame) = message {
                let _ = close_tx.send(frame.map(|f| f.code));
                break;
            }
        }
    });

    let client = client_for(addr);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    client.register_handler(HandlerKey::AnyThing, Arc::new(Forward(events_tx)));

    // Remembered while disconnected and sent on connect.
    assert!(matches!(
        client.subscribe_to_things(Vec::new(), None).await,
        Err(RegistryClientError::NotConnected)
    ));

    let runner = tokio::spawn(Arc::clone(&client).run());
    assert!(client.wait_until_connected(WAIT).await);

    assert_eq!(
        auth_rx.await.unwrap().as_deref(),
        Some("Basic ZGl0dG86ZGl0dG8=")
    );

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.twin_id.as_deref(), Some("twinA"));
    assert_eq!(event.action.as_deref(), Some("modified"));
    assert_eq!(event.feature_id.as_deref(), Some("temp"));
    assert_eq!(event.value, json!(42.5));

    client.disconnect().await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(
        timeout(WAIT, close_rx).await.unwrap().unwrap(),
        Some(CloseCode::Normal)
    );

    timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn reconnects_and_replays_subscriptions() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (commands_tx, mut commands) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        for _ in 0..2 {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let command: serde_json::Value =
                serde_json::from_str(&next_text(&mut ws).await).unwrap();
            commands_tx.send(command).unwrap();
            // Dropping the socket without a close frame forces a reconnect.
        }
    });

    let client = client_for(addr);
    let _ = client.subscribe_to_thing("ns:pump").await;
    let runner = tokio::spawn(Arc::clone(&client).run());

    for _ in 0..2 {
        let command = timeout(WAIT, commands.recv()).await.unwrap().unwrap();
        assert_eq!(command["type"], "START-SEND-EVENTS");
        assert_eq!(command["payload"]["topic"], "/ns:pump/things/twin/events");
    }

    server.await.unwrap();
    client.disconnect().await;
    timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
}

struct PanicOnce {
    panicked: AtomicBool,
    forward: Forward,
}

#[async_trait]
impl RegistryEventHandler for PanicOnce {
    async fn on_event(&self, event: &RegistryEvent) {
        assert!(self.panicked.swap(true, Ordering::SeqCst), "first event panics");
        self.forward.on_event(event).await;
    }
}

#[tokio::test]
async fn handler_panic_restarts_connection_loop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (commands_tx, mut commands) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let mut sockets = Vec::new();
        for n in 0..2 {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let command: serde_json::Value =
                serde_json::from_str(&next_text(&mut ws).await).unwrap();
            commands_tx.send(command).unwrap();
            let frame = json!({
                "topic": "/ns/twinA/things/twin/events/modified",
                "path": "/features/temp/properties/value",
                "value": n,
                "timestamp": "2024-01-01T00:00:00Z"
            });
            ws.send(Message::Text(frame.to_string().into()))
                .await
                .unwrap();
            sockets.push(ws);
        }
        sockets
    });

    let client = client_for(addr);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    client.register_handler(
        HandlerKey::AnyThing,
        Arc::new(PanicOnce {
            panicked: AtomicBool::new(false),
            forward: Forward(events_tx),
        }),
    );
    let _ = client.subscribe_to_things(Vec::new(), None).await;
    let runner = tokio::spawn(Arc::clone(&client).run_supervised());

    let first = timeout(WAIT, commands.recv()).await.unwrap().unwrap();
    assert_eq!(first["type"], "START-SEND-EVENTS");

    // The panicked loop must not leave a stale connected state behind.
    timeout(WAIT, async {
        while client.connection_state() == ConnectionState::Connected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let replayed = timeout(WAIT, commands.recv()).await.unwrap().unwrap();
    assert_eq!(replayed["payload"]["topic"], "/_/things/twin/events");

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.value, json!(1));
    assert!(client.is_connected());

    client.disconnect().await;
    timeout(WAIT, runner).await.unwrap().unwrap();
    drop(server.await.unwrap());
}
