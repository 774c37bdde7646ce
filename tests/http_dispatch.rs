//! HTTP-mode dispatch against a live replica.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use tokio::net::TcpListener;

use handler_runtime::codec::Payload;
use handler_runtime::lifecycle::{Runtime, Shutdown};
use handler_runtime::{
    Callback, HandlerError, HttpHandler, HttpMethods, HttpRequest, InFlightTracker, InitContext,
    Reply, RequestCounter,
};

mod common;

/// POST echoes the decoded payload; PUT always fails; GET greets.
struct Echo {
    greeting: String,
}

impl HttpHandler for Echo {
    fn new(ctx: InitContext) -> Result<Self, HandlerError> {
        let greeting = ctx.config().get_str("greeting")?.unwrap_or("hello").to_string();
        Ok(Self { greeting })
    }

    fn methods(methods: &mut HttpMethods<Self>) {
        methods
            .post(|_echo, request: HttpRequest| async move {
                let reply = match request.payload {
                    None => Reply::text("empty"),
                    Some(Payload::Json(value)) => Reply::json(value),
                    Some(Payload::Text { value, .. }) => Reply::text(value),
                    Some(Payload::Bytes(raw)) => Reply::bytes(raw),
                    Some(Payload::Form(fields)) => {
                        Reply::text(fields.text("name").unwrap_or_default().to_string())
                    }
                };
                Ok::<_, HandlerError>(reply)
            })
            .put(|_echo, _request| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err::<String, _>(HandlerError::new("database password is hunter2"))
            })
            .get(|echo: Arc<Echo>, request: HttpRequest| async move {
                let name = request.query("name").unwrap_or_else(|| "world".to_string());
                Ok::<_, HandlerError>(format!("{}, {}", echo.greeting, name))
            });
    }
}

fn echo_config() -> handler_runtime::RuntimeConfig {
    let mut config = common::http_config("echo", &["POST", "PUT", "GET"]);
    config
        .handler
        .insert("greeting".into(), toml::Value::String("hi".into()));
    config
}

#[tokio::test]
async fn text_payload_round_trips() {
    let replica = common::start_http::<Echo>(echo_config()).await;

    let res = common::client()
        .post(replica.url())
        .header("content-type", "text/plain; charset=utf-8")
        .body("hello world")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "hello world");
    replica.stop().await;
}

#[tokio::test]
async fn json_payload_is_byte_identical() {
    let replica = common::start_http::<Echo>(echo_config()).await;
    let body = r#"{"a":1,"b":[true,null],"c":{"d":"e"}}"#;

    let res = common::client()
        .post(replica.url())
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/json");
    assert_eq!(res.text().await.unwrap(), body);
    replica.stop().await;
}

#[tokio::test]
async fn undeclared_content_is_passed_as_bytes() {
    let replica = common::start_http::<Echo>(echo_config()).await;
    let raw = vec![0u8, 159, 146, 150, 255];

    let res = common::client()
        .post(replica.url())
        .header("content-type", "application/octet-stream")
        .body(raw.clone())
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/octet-stream");
    assert_eq!(res.bytes().await.unwrap().to_vec(), raw);
    replica.stop().await;
}

#[tokio::test]
async fn form_fields_reach_the_handler() {
    let replica = common::start_http::<Echo>(echo_config()).await;

    let res = common::client()
        .post(replica.url())
        .header("content-type", "application/x-www-form-urlencoded")
        .body("name=ada+lovelace&lang=en")
        .send()
        .await
        .unwrap();

    assert_eq!(res.text().await.unwrap(), "ada lovelace");
    replica.stop().await;
}

#[tokio::test]
async fn query_and_config_reach_get() {
    let replica = common::start_http::<Echo>(echo_config()).await;

    let res = common::client()
        .get(format!("{}/?name=ada", replica.url()))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["x-request-id"], "req-42");
    assert_eq!(res.text().await.unwrap(), "hi, ada");
    replica.stop().await;
}

#[tokio::test]
async fn unsupported_verb_is_405_with_allow() {
    let replica = common::start_http::<Echo>(echo_config()).await;

    let res = common::client().delete(replica.url()).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = res.headers()["allow"].to_str().unwrap().to_string();
    for verb in ["GET", "POST", "PUT"] {
        assert!(allow.contains(verb), "allow header {allow:?} misses {verb}");
    }
    assert_eq!(replica.in_flight("echo"), 0);
    replica.stop().await;
}

#[tokio::test]
async fn malformed_json_is_rejected_before_the_handler() {
    let replica = common::start_http::<Echo>(echo_config()).await;

    let res = common::client()
        .post(replica.url())
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(res.text().await.unwrap().contains("invalid json"));
    assert!(common::eventually(Duration::from_secs(2), || replica.in_flight("echo") == 0).await);
    replica.stop().await;
}

#[tokio::test]
async fn handler_failures_hide_details_and_release_in_flight() {
    let replica = common::start_http::<Echo>(echo_config()).await;
    let client = common::client();

    let mut calls = Vec::new();
    for i in 0..20 {
        let client = client.clone();
        let url = replica.url();
        calls.push(tokio::spawn(async move {
            let req = if i % 2 == 0 {
                client.put(&url).body("x")
            } else {
                client.post(&url).header("content-type", "text/plain").body("ok")
            };
            req.send().await.unwrap()
        }));
    }

    for (i, call) in calls.into_iter().enumerate() {
        let res = call.await.unwrap();
        if i % 2 == 0 {
            assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let body = res.text().await.unwrap();
            assert!(!body.contains("hunter2"));
        } else {
            assert_eq!(res.status(), StatusCode::OK);
        }
    }

    assert!(common::eventually(Duration::from_secs(2), || replica.in_flight("echo") == 0).await);
    replica.stop().await;
}

static CALLBACK_EVENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());

/// Replies immediately and records work in a callback afterwards.
struct Deferred;

impl HttpHandler for Deferred {
    fn new(_ctx: InitContext) -> Result<Self, HandlerError> {
        Ok(Deferred)
    }

    fn methods(methods: &mut HttpMethods<Self>) {
        methods.post(|_deferred, request: HttpRequest| async move {
            let tag = request
                .payload
                .as_ref()
                .and_then(Payload::as_text)
                .unwrap_or_default()
                .to_string();
            let callback = if tag == "fail" {
                Callback::new(|| Err(HandlerError::new("callback exploded")))
            } else {
                let tag = tag.clone();
                Callback::future(async move {
                    CALLBACK_EVENTS.lock().unwrap().push(tag);
                    Ok(())
                })
            };
            Ok::<_, HandlerError>(Reply::text(format!("accepted {}", tag)).with_callback(callback))
        });
    }
}

#[tokio::test]
async fn callbacks_run_after_response_and_failures_stay_isolated() {
    let replica = common::start_http::<Deferred>(common::http_config("deferred", &["POST"])).await;
    let client = common::client();

    let res = client
        .post(replica.url())
        .header("content-type", "text/plain")
        .body("fail")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "accepted fail");

    let res = client
        .post(replica.url())
        .header("content-type", "text/plain")
        .body("first")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "accepted first");

    let ran = common::eventually(Duration::from_secs(2), || {
        CALLBACK_EVENTS.lock().unwrap().iter().any(|e| e == "first")
    })
    .await;
    assert!(ran, "callback did not run after delivery");
    assert!(common::eventually(Duration::from_secs(2), || replica.in_flight("deferred") == 0).await);
    replica.stop().await;
}

/// Holds its permit for a while so later requests queue up.
struct Slow;

impl HttpHandler for Slow {
    fn new(_ctx: InitContext) -> Result<Self, HandlerError> {
        Ok(Slow)
    }

    fn methods(methods: &mut HttpMethods<Self>) {
        methods.blocking(axum::http::Method::POST, |_slow: &Slow, _request| {
            std::thread::sleep(Duration::from_millis(300));
            Ok::<_, HandlerError>("slow")
        });
    }
}

#[tokio::test]
async fn full_queue_rejects_with_503() {
    let mut config = common::http_config("slow", &["POST"]);
    config.concurrency.max_concurrency = 1;
    config.concurrency.max_queue_length = 0;
    let replica = common::start_http::<Slow>(config).await;
    let client = common::client();

    let url = replica.url();
    let busy = tokio::spawn({
        let client = client.clone();
        async move { client.post(&url).send().await.unwrap().status() }
    });
    assert!(common::eventually(Duration::from_secs(2), || replica.in_flight("slow") == 1).await);

    let rejected = client.post(replica.url()).send().await.unwrap();
    assert_eq!(rejected.status(), StatusCode::SERVICE_UNAVAILABLE);

    assert_eq!(busy.await.unwrap(), StatusCode::OK);
    assert!(common::eventually(Duration::from_secs(2), || replica.in_flight("slow") == 0).await);
    replica.stop().await;
}

static CONSTRUCTED: AtomicUsize = AtomicUsize::new(0);

/// Expensive constructor; every request checks it saw a finished instance.
struct Heavy {
    ready: bool,
}

impl HttpHandler for Heavy {
    fn new(_ctx: InitContext) -> Result<Self, HandlerError> {
        CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        Ok(Heavy { ready: true })
    }

    fn methods(methods: &mut HttpMethods<Self>) {
        methods.post(|heavy: Arc<Heavy>, _request| async move {
            if heavy.ready {
                Ok("ready")
            } else {
                Err(HandlerError::new("half-built handler"))
            }
        });
    }
}

#[tokio::test]
async fn concurrent_first_requests_see_one_construction() {
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let mut config = common::http_config("heavy", &["POST"]);
    config.concurrency.max_concurrency = 16;
    config.concurrency.max_queue_length = 200;
    let counter = Arc::new(InFlightTracker::new());
    let shutdown = Arc::new(Shutdown::new());

    let runtime = Runtime::new(config).with_counter(Arc::clone(&counter) as Arc<dyn RequestCounter>);
    let server_shutdown = Arc::clone(&shutdown);
    let server = tokio::spawn(async move {
        let server = runtime.http::<Heavy>().await.unwrap();
        let listener = TcpListener::bind(addr).await.unwrap();
        server.run(listener, server_shutdown).await
    });

    let client = common::client();
    let mut calls = Vec::new();
    for _ in 0..100 {
        let client = client.clone();
        calls.push(tokio::spawn(async move {
            loop {
                match client.post(format!("http://{}", addr)).send().await {
                    Ok(res) => return (res.status(), res.text().await.unwrap()),
                    Err(e) if e.is_connect() => tokio::time::sleep(Duration::from_millis(20)).await,
                    Err(e) => panic!("request failed: {e}"),
                }
            }
        }));
    }

    for call in calls {
        let (status, body) = tokio::time::timeout(Duration::from_secs(10), call)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }
    assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
    assert!(common::eventually(Duration::from_secs(2), || counter.get("heavy") == 0).await);

    shutdown.trigger();
    let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
}
