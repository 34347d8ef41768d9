//! End-to-end integration tests — a host and a frame linked through a
//! message hub, with calls travelling provider → stream middleware →
//! multiplexed substream → served engine and back.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use postrpc_engine::legacy::{LegacyMiddleware, SharedRequest, SharedResponse, ScaffoldEntry, scaffold};
use postrpc_engine::{
    EngineError, Flow, JsonRpcEngine, JsonRpcServer, LegacyEngine, Provider, RequestArgs, Scaffold, boxed,
    from_fn,
};
use postrpc_protocol::{Call, Fault, RpcError};
use postrpc_transport::{
    HandshakeStream, MessageHub, Multiplexer, StreamConfig, StreamMiddleware, StreamState, serve_engine,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

const HOST_ORIGIN: &str = "https://host.test";
const FRAME_ORIGIN: &str = "https://frame.test";

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    timeout(Duration::from_secs(5), fut).await.expect("timed out")
}

fn host_stream(hub: &MessageHub) -> HandshakeStream {
    HandshakeStream::connect(
        hub.endpoint(HOST_ORIGIN),
        StreamConfig::new("host", "frame").with_target_origin(FRAME_ORIGIN),
    )
}

fn frame_stream(hub: &MessageHub) -> HandshakeStream {
    HandshakeStream::connect(
        hub.endpoint(FRAME_ORIGIN),
        StreamConfig::new("frame", "host").with_target_origin(HOST_ORIGIN),
    )
}

/// Both multiplexers, with the handshake already complete.
async fn link(hub: &MessageHub) -> (Multiplexer, Multiplexer) {
    let host = Multiplexer::new(host_stream(hub));
    let frame = Multiplexer::new(frame_stream(hub));
    within(host.physical().opened()).await.unwrap();
    within(frame.physical().opened()).await.unwrap();
    (host, frame)
}

/// Structural engine the frame serves in most tests.
fn frame_engine() -> Arc<JsonRpcEngine> {
    let engine = JsonRpcEngine::builder()
        .with(
            Scaffold::new()
                .with_result("ping", json!("pong"))
                .with_middleware(
                    "echo",
                    from_fn(|call: Arc<Call>, _ctx, _next| async move {
                        Ok(Some(call.params().cloned().unwrap_or(Value::Null)))
                    }),
                )
                .with_middleware(
                    "slow",
                    from_fn(|call: Arc<Call>, _ctx, _next| async move {
                        let ms = call.params().and_then(Value::as_u64).unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Ok(Some(json!(ms)))
                    }),
                )
                .with_middleware(
                    "reject",
                    from_fn(|_call: Arc<Call>, _ctx, _next| async move {
                        Err(EngineError::from(RpcError::user_rejected()))
                    }),
                ),
        )
        .build()
        .unwrap();
    Arc::new(engine)
}

fn client(host: &Multiplexer) -> (Provider, mpsc::UnboundedReceiver<Call>) {
    let (forward, notifications) = StreamMiddleware::new(host.create_stream("rpc").unwrap());
    let engine = JsonRpcEngine::create(vec![boxed(forward)]).unwrap();
    (Provider::new(Arc::new(engine)), notifications)
}

// ─────────────────────────────────────────────────────────────────────────────
// Structural engine on the frame
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn request_round_trip() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        frame.create_stream("rpc").unwrap(),
    );
    let (provider, _notes) = client(&host);

    let pong = within(provider.request(RequestArgs::new("ping", None))).await.unwrap();
    assert_eq!(pong, json!("pong"));

    let echoed = within(provider.request(RequestArgs::new("echo", Some(json!({"a": [1, 2]})))))
        .await
        .unwrap();
    assert_eq!(echoed, json!({"a": [1, 2]}));
}

#[tokio::test]
async fn application_errors_keep_their_code() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        frame.create_stream("rpc").unwrap(),
    );
    let (provider, _notes) = client(&host);

    let err = within(provider.request(RequestArgs::new("reject", None)))
        .await
        .unwrap_err();
    assert_eq!(err.code, 4001);
    assert_eq!(err.message, "User rejected the request.");
}

#[tokio::test]
async fn send_preserves_caller_id() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        frame.create_stream("rpc").unwrap(),
    );
    let (provider, _notes) = client(&host);

    let response = within(provider.send(Call::request("caller-7", "ping", None))).await;
    assert_eq!(
        response.to_value(),
        json!({"jsonrpc": "2.0", "id": "caller-7", "result": "pong"})
    );
}

#[tokio::test]
async fn concurrent_requests_resolve_independently() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        frame.create_stream("rpc").unwrap(),
    );
    let (provider, _notes) = client(&host);

    let delays = [60u64, 5, 30, 15];
    let results = within(join_all(
        delays
            .iter()
            .map(|ms| provider.request(RequestArgs::new("slow", Some(json!(ms))))),
    ))
    .await;

    for (ms, result) in delays.iter().zip(results) {
        assert_eq!(result.unwrap(), json!(ms));
    }
}

#[tokio::test]
async fn host_server_forwards_batches() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        frame.create_stream("rpc").unwrap(),
    );
    let (forward, _notes) = StreamMiddleware::new(host.create_stream("rpc").unwrap());
    let host_server = JsonRpcServer::new(Arc::new(JsonRpcEngine::create(vec![boxed(forward)]).unwrap()));

    let batch = r#"[
        {"jsonrpc": "2.0", "id": 1, "method": "ping"},
        {"jsonrpc": "2.0", "method": "fireAndForget"},
        {"jsonrpc": "2.0", "id": 2, "method": "echo", "params": [3]}
    ]"#;
    let responses = within(host_server.handle_text(batch)).await.unwrap();
    assert_eq!(
        responses,
        json!([
            {"jsonrpc": "2.0", "id": 1, "result": "pong"},
            {"jsonrpc": "2.0", "id": 2, "result": [3]},
        ])
    );

    let parse_error = within(host_server.handle_text("{nope")).await.unwrap();
    assert_eq!(parse_error["error"]["code"], -32700);
}

// ─────────────────────────────────────────────────────────────────────────────
// Callback engine on the frame
// ─────────────────────────────────────────────────────────────────────────────

fn reject_legacy() -> impl LegacyMiddleware {
    |_req: SharedRequest, _res: SharedResponse, _flow: Flow| -> Result<(), Fault> {
        Err(RpcError::user_rejected().into())
    }
}

#[tokio::test]
async fn legacy_engine_serves_substream() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;

    let legacy = LegacyEngine::new();
    legacy.push(scaffold([
        ("ping", ScaffoldEntry::from(json!("legacy pong"))),
        ("reject", ScaffoldEntry::Middleware(Arc::new(reject_legacy()))),
    ]));
    legacy.push_boxed(frame_engine().as_legacy_middleware());
    serve_engine(Arc::new(legacy), frame.create_stream("rpc").unwrap());

    let (provider, _notes) = client(&host);

    let pong = within(provider.request(RequestArgs::new("ping", None))).await.unwrap();
    assert_eq!(pong, json!("legacy pong"));

    let echoed = within(provider.request(RequestArgs::new("echo", Some(json!("via v2")))))
        .await
        .unwrap();
    assert_eq!(echoed, json!("via v2"));

    let err = within(provider.request(RequestArgs::new("reject", None)))
        .await
        .unwrap_err();
    assert_eq!(err.code, 4001);
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn frame_notifications_reach_host() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    let frame_rpc = frame.create_stream("rpc").unwrap();
    let (_provider, mut notes) = client(&host);

    frame_rpc
        .write(Call::notification("chainChanged", Some(json!("0x1"))).to_value())
        .unwrap();

    let note = within(notes.recv()).await.unwrap();
    assert_eq!(note.method(), "chainChanged");
    assert_eq!(note.params(), Some(&json!("0x1")));
}

#[tokio::test]
async fn substreams_share_one_channel() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        frame.create_stream("rpc").unwrap(),
    );
    let mut frame_events = frame.create_stream("events").unwrap();
    let host_events = host.create_stream("events").unwrap();
    let (provider, _notes) = client(&host);

    host_events.write(json!({"kind": "resize"})).unwrap();
    let pong = within(provider.request(RequestArgs::new("ping", None))).await.unwrap();

    assert_eq!(pong, json!("pong"));
    assert_eq!(
        within(frame_events.recv()).await.unwrap().unwrap(),
        json!({"kind": "resize"})
    );
}

#[tokio::test]
async fn host_survives_frame_reload() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        frame.create_stream("rpc").unwrap(),
    );
    let (provider, _notes) = client(&host);
    assert_eq!(
        within(provider.request(RequestArgs::new("ping", None))).await.unwrap(),
        json!("pong")
    );

    frame.end();
    within(async {
        while host.physical().state() != StreamState::Handshaking {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(!host.is_ended());

    let pending = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.request(RequestArgs::new("echo", Some(json!("again")))).await })
    };

    let reloaded = Multiplexer::new(frame_stream(&hub));
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        reloaded.create_stream("rpc").unwrap(),
    );

    assert_eq!(within(pending).await.unwrap().unwrap(), json!("again"));
}

#[tokio::test]
async fn ending_host_fails_in_flight_requests() {
    let hub = MessageHub::new();
    let (host, frame) = link(&hub).await;
    serve_engine(
        Arc::new(JsonRpcServer::new(frame_engine())),
        frame.create_stream("rpc").unwrap(),
    );
    let (provider, _notes) = client(&host);

    let in_flight = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.request(RequestArgs::new("slow", Some(json!(500)))).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    host.end();

    let err = within(in_flight).await.unwrap().unwrap_err();
    assert_eq!(err.code, 4900);

    let err = within(provider.request(RequestArgs::new("ping", None)))
        .await
        .unwrap_err();
    assert_eq!(err.code, 4900);
}
