//! End-to-end tests using a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use magicsocket_core::{Frame, TopicSet};
use magicsocket_server::{
    Authorizer, ConnectRequest, ConnectionHooks, EmitRule, MagicSocketServer, Registration,
    Rejection, ServerConfig,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

type Log = Arc<Mutex<Vec<(String, String)>>>;

struct TestServer {
    server: Arc<MagicSocketServer>,
    addr: SocketAddr,
    incoming: Log,
    disconnects: Arc<Mutex<Vec<String>>>,
}

/// Boot a server whose authorizer reads `key` and `topics` from the query
/// string and records hook activity.
async fn boot(config: ServerConfig) -> TestServer {
    let incoming: Log = Arc::new(Mutex::new(Vec::new()));
    let disconnects = Arc::new(Mutex::new(Vec::new()));
    let (seen, gone) = (Arc::clone(&incoming), Arc::clone(&disconnects));

    let authorizer = move |req: &ConnectRequest| -> Result<Registration, Rejection> {
        let key = req
            .query_param("key")
            .ok_or_else(|| Rejection::new("missing key"))?
            .to_string();
        let topics: TopicSet = req
            .query_param("topics")
            .map(|t| t.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();

        let (seen, gone) = (Arc::clone(&seen), Arc::clone(&gone));
        let (in_key, out_key) = (key.clone(), key.clone());
        let hooks = ConnectionHooks::new()
            .on_incoming(move |frame| {
                let body = String::from_utf8_lossy(frame.as_bytes()).into_owned();
                seen.lock().push((in_key.clone(), body));
                Ok(())
            })
            .on_disconnect(move || {
                gone.lock().push(out_key.clone());
                Ok(())
            });
        Ok(Registration::new(key).with_topics(topics).with_hooks(hooks))
    };

    let server = Arc::new(MagicSocketServer::new(config, authorizer));
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        server,
        addr,
        incoming,
        disconnects,
    }
}

impl TestServer {
    fn url(&self, query: &str) -> String {
        format!("ws://{}/?{query}", self.addr)
    }

    /// Connect and wait until the server has registered `key`.
    async fn connect(&self, key: &str, topics: &str) -> WsStream {
        let (ws, _) = connect_async(self.url(&format!("key={key}&topics={topics}")))
            .await
            .unwrap();
        let registry = Arc::clone(self.server.registry());
        let key = key.to_string();
        eventually(move || registry.contains_key(&key)).await;
        ws
    }

    /// Status code of a refused handshake.
    async fn refused(&self, query: &str) -> u16 {
        match connect_async(self.url(query)).await {
            Err(tungstenite::Error::Http(resp)) => resp.status().as_u16(),
            Err(other) => panic!("unexpected handshake error: {other}"),
            Ok(_) => panic!("handshake should have been refused"),
        }
    }
}

async fn eventually(check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

/// Next data message, skipping control frames.
async fn next_data(ws: &mut WsStream) -> Message {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended")
            .expect("read failed");
        if msg.is_text() || msg.is_binary() {
            return msg;
        }
    }
}

async fn next_text(ws: &mut WsStream) -> String {
    next_data(ws).await.to_text().unwrap().to_string()
}

#[tokio::test]
async fn keyed_emit_reaches_only_its_target() {
    let ts = boot(ServerConfig::default()).await;
    let mut c1 = ts.connect("c1", "t1,t2").await;
    let mut c2 = ts.connect("c2", "t3").await;

    let emission = ts.server.emit(&[EmitRule::keys(["c1"])], Frame::text("hello"));
    assert_eq!(emission.len(), 1);
    assert!(emission.wait().await.is_complete());
    assert_eq!(next_text(&mut c1).await, "hello");

    // c2's first message is the one addressed to it, not "hello".
    let _ = ts
        .server
        .emit(&[EmitRule::any_of(["t3"])], Frame::text("second"))
        .wait()
        .await;
    assert_eq!(next_text(&mut c2).await, "second");
}

#[tokio::test]
async fn topic_policies_over_the_wire() {
    let ts = boot(ServerConfig::default()).await;
    let mut a = ts.connect("a", "x").await;
    let mut b = ts.connect("b", "x,y").await;
    let mut c = ts.connect("c", "y").await;

    let all_of = ts.server.emit(&[EmitRule::all_of(["x", "y"])], Frame::text("both"));
    assert_eq!(all_of.len(), 1);
    let _ = all_of.wait().await;

    let any_of = ts.server.emit(&[EmitRule::any_of(["x"])], Frame::text("some"));
    assert_eq!(any_of.len(), 2);
    let _ = any_of.wait().await;

    let _ = ts.server.emit(&[], Frame::text("everyone")).wait().await;

    assert_eq!(next_text(&mut a).await, "some");
    assert_eq!(next_text(&mut a).await, "everyone");
    assert_eq!(next_text(&mut b).await, "both");
    assert_eq!(next_text(&mut b).await, "some");
    assert_eq!(next_text(&mut b).await, "everyone");
    assert_eq!(next_text(&mut c).await, "everyone");
}

#[tokio::test]
async fn json_and_binary_payloads() {
    let ts = boot(ServerConfig::default()).await;
    let mut ws = ts.connect("c1", "").await;

    let _ = ts
        .server
        .emit_json(&[EmitRule::all()], &serde_json::json!({"event": "tick", "n": 3}))
        .unwrap()
        .wait()
        .await;
    let parsed: Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
    assert_eq!(parsed["event"], "tick");
    assert_eq!(parsed["n"], 3);

    let _ = ts
        .server
        .emit(&[], Frame::binary(vec![0u8, 1, 2]))
        .wait()
        .await;
    let msg = next_data(&mut ws).await;
    assert!(msg.is_binary());
    assert_eq!(msg.into_data().to_vec(), vec![0u8, 1, 2]);
}

#[tokio::test]
async fn incoming_frames_reach_hook_without_echo() {
    let ts = boot(ServerConfig::default()).await;
    let mut ws = ts.connect("c1", "").await;

    ws.send(Message::Text("from client".to_string().into()))
        .await
        .unwrap();
    let incoming = Arc::clone(&ts.incoming);
    eventually(move || !incoming.lock().is_empty()).await;
    assert_eq!(
        ts.incoming.lock()[0],
        ("c1".to_string(), "from client".to_string())
    );

    // Nothing was echoed: the next data message is the marker.
    let _ = ts.server.emit(&[], Frame::text("marker")).wait().await;
    assert_eq!(next_text(&mut ws).await, "marker");
}

#[tokio::test]
async fn duplicate_key_is_409() {
    let ts = boot(ServerConfig::default()).await;
    let _first = ts.connect("dup", "").await;
    assert_eq!(ts.refused("key=dup").await, 409);
    assert_eq!(ts.server.registry().len(), 1);
}

#[tokio::test]
async fn authorizer_rejection_is_400() {
    let ts = boot(ServerConfig::default()).await;
    assert_eq!(ts.refused("topics=a").await, 400);
    assert!(ts.server.registry().is_empty());
}

#[tokio::test]
async fn connection_limit_is_503() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let ts = boot(config).await;
    let _only = ts.connect("only", "").await;
    assert_eq!(ts.refused("key=extra").await, 503);
}

/// Admits `?key=` after a delay, so concurrent upgrades overlap.
struct SlowAuthorizer;

#[async_trait::async_trait]
impl Authorizer for SlowAuthorizer {
    async fn authorize(&self, req: &ConnectRequest) -> Result<Registration, Rejection> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let key = req
            .query_param("key")
            .ok_or_else(|| Rejection::new("missing key"))?;
        Ok(Registration::new(key))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connection_limit_holds_under_concurrent_upgrades() {
    let config = ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    };
    let server = Arc::new(MagicSocketServer::new(config, SlowAuthorizer));
    let (addr, _handle) = server.listen().await.unwrap();

    let (a, b) = tokio::join!(
        connect_async(format!("ws://{addr}/?key=a")),
        connect_async(format!("ws://{addr}/?key=b")),
    );
    assert!(a.is_ok() || b.is_ok());

    let registry = Arc::clone(server.registry());
    eventually(move || registry.len() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.registry().len(), 1);
    drop((a, b));
}

#[tokio::test]
async fn client_close_tears_down_once() {
    let ts = boot(ServerConfig::default()).await;
    let mut ws = ts.connect("c1", "").await;

    ws.close(None).await.unwrap();

    let registry = Arc::clone(ts.server.registry());
    eventually(move || registry.is_empty()).await;
    let disconnects = Arc::clone(&ts.disconnects);
    eventually(move || !disconnects.lock().is_empty()).await;
    assert_eq!(*ts.disconnects.lock(), vec!["c1".to_string()]);

    // The key is free again.
    let _again = ts.connect("c1", "").await;
}

#[tokio::test]
async fn abrupt_client_drop_tears_down() {
    let ts = boot(ServerConfig::default()).await;
    let ws = ts.connect("c1", "").await;
    drop(ws);

    let registry = Arc::clone(ts.server.registry());
    eventually(move || registry.is_empty()).await;
    assert_eq!(ts.disconnects.lock().len(), 1);
}

#[tokio::test]
async fn rename_redirects_key_based_emit() {
    let ts = boot(ServerConfig::default()).await;
    let mut ws = ts.connect("c1", "").await;
    let registry = ts.server.registry();
    let id = registry.lookup("c1").unwrap().id().clone();

    registry.rename(&id, "c2").unwrap();

    assert!(ts.server.emit(&[EmitRule::keys(["c1"])], Frame::text("old")).is_empty());
    let _ = ts
        .server
        .emit(&[EmitRule::keys(["c2"])], Frame::text("new"))
        .wait()
        .await;
    assert_eq!(next_text(&mut ws).await, "new");

    // The old key can be claimed by someone else now.
    let _other = ts.connect("c1", "").await;
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn set_topics_changes_routing() {
    let ts = boot(ServerConfig::default()).await;
    let mut ws = ts.connect("c1", "old").await;
    let registry = ts.server.registry();
    let id = registry.lookup("c1").unwrap().id().clone();

    registry.set_topics(&id, ["new"]).unwrap();

    assert!(ts.server.emit(&[EmitRule::any_of(["old"])], Frame::text("a")).is_empty());
    let _ = ts
        .server
        .emit(&[EmitRule::any_of(["new"])], Frame::text("b"))
        .wait()
        .await;
    assert_eq!(next_text(&mut ws).await, "b");
}

#[tokio::test]
async fn remove_closes_client_socket() {
    let ts = boot(ServerConfig::default()).await;
    let mut ws = ts.connect("c1", "").await;
    let id = ts.server.registry().lookup("c1").unwrap().id().clone();

    ts.server.registry().remove(&id).await;

    let end = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok(), "client should observe the close");
    assert_eq!(*ts.disconnects.lock(), vec!["c1".to_string()]);
}

#[tokio::test]
async fn stop_closes_everyone_once() {
    let ts = boot(ServerConfig::default()).await;
    let mut a = ts.connect("a", "").await;
    let _b = ts.connect("b", "").await;

    // One client leaves on its own first.
    a.close(None).await.unwrap();
    let disconnects = Arc::clone(&ts.disconnects);
    eventually(move || disconnects.lock().len() == 1).await;

    ts.server.stop().await;
    ts.server.stop().await;

    assert!(ts.server.registry().is_empty());
    let mut gone = ts.disconnects.lock().clone();
    gone.sort();
    assert_eq!(gone, vec!["a".to_string(), "b".to_string()]);

    assert!(ts.server.registry().is_stopped());
    assert!(ts.server.shutdown().is_shutting_down());
}

#[tokio::test]
async fn health_endpoint_counts_connections() {
    let ts = boot(ServerConfig::default()).await;
    let _a = ts.connect("a", "").await;
    let _b = ts.connect("b", "").await;

    let body: Value = reqwest::get(format!("http://{}/health", ts.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
}
