//! Wire-level tests against a scripted extension client.

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use futures_util::{SinkExt, StreamExt};
use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use scrollshot::capture::emitter::PNG_MIME;
use scrollshot::transport::PendingServer;
use scrollshot::{
    CaptureHost, CaptureOptions, CaptureService, Error, ExtensionHost, ImagePayload, PageScript,
    ServiceConfig, TabId,
};

// ============================================================================
// Fake Extension
// ============================================================================

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READY: &str = r#"{"id":"00000000-0000-0000-0000-000000000000","type":"success","result":{"extension":"scrollshot","version":"0.3.0"}}"#;

async fn connect(url: String) -> anyhow::Result<Client> {
    let (mut ws, _) = connect_async(url).await?;
    ws.send(Message::Text(READY.into())).await?;
    Ok(ws)
}

fn success(request: &Value, result: Value) -> Value {
    json!({ "id": request["id"], "type": "success", "result": result })
}

fn failure(request: &Value, code: &str, message: &str) -> Value {
    json!({ "id": request["id"], "type": "error", "error": code, "message": message })
}

fn png_data_url(width: u32, height: u32) -> String {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 100, 50, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).expect("encode");
    format!("data:image/png;base64,{}", Base64Standard.encode(out.into_inner()))
}

/// Answers requests with `answer` and forwards every message to `seen`.
///
/// Requests `answer` maps to `None` are left unanswered.
async fn respond<F>(mut ws: Client, mut answer: F, seen: mpsc::UnboundedSender<Value>)
where
    F: FnMut(&Value) -> Option<Value> + Send,
{
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let value: Value = serde_json::from_str(text.as_str()).expect("valid json");

        let is_request = value.get("type").is_none() && value.get("replyTo").is_none();
        if is_request && let Some(reply) = answer(&value) {
            if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                break;
            }
        }
        let _ = seen.send(value);
    }
}

async fn next_matching(
    seen: &mut mpsc::UnboundedReceiver<Value>,
    predicate: impl Fn(&Value) -> bool,
) -> Value {
    timeout(Duration::from_secs(10), async {
        loop {
            let value = seen.recv().await.expect("extension still connected");
            if predicate(&value) {
                return value;
            }
        }
    })
    .await
    .expect("message within timeout")
}

// ============================================================================
// ExtensionHost
// ============================================================================

#[tokio::test]
async fn test_extension_host_round_trips() -> anyhow::Result<()> {
    let server = PendingServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
    let url = server.ws_url();
    let (accepted, client) = tokio::join!(server.accept(), connect(url));
    let (connection, ready) = accepted?;
    assert_eq!(ready.extension, "scrollshot");
    assert_eq!(ready.version, "0.3.0");

    let mut captures = 0;
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    tokio::spawn(respond(
        client?,
        move |request| {
            Some(match request["method"].as_str().unwrap_or_default() {
                "tabs.queryActive" => success(request, json!({ "tabId": 3 })),
                "script.execute" => success(request, json!({ "value": request["params"]["args"] })),
                "tabs.captureVisible" => {
                    captures += 1;
                    if captures == 1 {
                        failure(
                            request,
                            "unknown error",
                            "This request exceeds the MAX_CAPTURE_VISIBLE_TAB_CALLS_PER_SECOND quota.",
                        )
                    } else {
                        success(request, json!({ "dataUrl": png_data_url(2, 3) }))
                    }
                }
                "downloads.download" => success(request, json!({ "downloadId": 1 })),
                _ => failure(request, "unknown command", "unsupported"),
            })
        },
        seen_tx,
    ));

    let host = ExtensionHost::new(connection);

    let tab = host.active_tab().await?.expect("active tab");
    assert_eq!(tab, TabId::new(3).expect("tab"));

    let script = PageScript::new("echo", "return arguments;", vec![json!("a"), json!(2)]);
    assert_eq!(host.execute_script(tab, &script).await?, json!(["a", 2]));

    let err = host.capture_visible(tab).await.expect_err("first capture is rejected");
    assert!(matches!(err, Error::RateLimited { .. }));

    let bytes = host.capture_visible(tab).await?;
    assert_eq!(image::load_from_memory(&bytes)?.height(), 3);

    let payload = ImagePayload {
        bytes: vec![1, 2, 3],
        mime: PNG_MIME,
        filename: "page.png".to_string(),
        save_as: false,
    };
    host.download(&payload).await?;

    let download = next_matching(&mut seen, |v| v["method"] == "downloads.download").await;
    assert_eq!(download["params"]["filename"], "page.png");
    assert_eq!(download["params"]["saveAs"], false);
    assert_eq!(download["params"]["url"], "data:image/png;base64,AQID");
    assert!(download.get("tabId").is_none());
    Ok(())
}

// ============================================================================
// CaptureService
// ============================================================================

/// Answers a 1500 px page in a 1000 px viewport.
fn page_answer(request: &Value) -> Value {
    match request["method"].as_str().unwrap_or_default() {
        "tabs.queryActive" => success(request, json!({ "tabId": 3 })),
        "script.execute" => {
            let script = request["params"]["script"].as_str().unwrap_or_default();
            let value = if script.contains("scrollshot-hide-scrollbars") {
                json!({ "contentHeight": 1500, "viewportHeight": 1000, "devicePixelRatio": 1 })
            } else if script.contains("translate3d(0, ' +") {
                json!({ "offset": request["params"]["args"][1] })
            } else {
                json!({ "restored": true, "failures": [] })
            };
            success(request, json!({ "value": value }))
        }
        "tabs.captureVisible" => success(request, json!({ "dataUrl": png_data_url(4, 1000) })),
        "downloads.download" => success(request, json!({ "downloadId": 9 })),
        _ => failure(request, "unknown command", "unsupported"),
    }
}

#[tokio::test]
async fn test_service_answers_triggers() -> anyhow::Result<()> {
    let config = ServiceConfig::new()
        .with_port(0)
        .with_capture(CaptureOptions::new().with_settle_delay(Duration::ZERO));
    let service = CaptureService::bind(config).await?;
    let url = service.ws_url();

    let (accepted, client) = tokio::join!(service.accept(), connect(url));
    let _connected = accepted?;
    let mut client = client?;

    // Both triggers are queued before any request is answered, so the first
    // session still holds the lock when the second arrives.
    for id in ["11111111-1111-4111-8111-111111111111", "22222222-2222-4222-8222-222222222222"] {
        let trigger = json!({
            "id": id,
            "type": "event",
            "method": "capture.trigger",
            "params": { "tabId": 3 },
        });
        client.send(Message::Text(trigger.to_string().into())).await?;
    }

    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    tokio::spawn(respond(client, |request| Some(page_answer(request)), seen_tx));

    let first = next_matching(&mut seen, |v| v.get("replyTo").is_some()).await;
    assert_eq!(first["replyTo"], "capture.trigger");
    assert_eq!(first["result"]["started"], true);

    let second = next_matching(&mut seen, |v| v.get("replyTo").is_some()).await;
    assert_eq!(second["result"]["started"], false);
    assert!(second["result"]["reason"].as_str().unwrap_or_default().contains("already"));

    let started = next_matching(&mut seen, |v| v["method"] == "capture.started").await;
    assert_eq!(started["type"], "notification");
    assert_eq!(started["params"]["tabId"], 3);

    let download = next_matching(&mut seen, |v| v["method"] == "downloads.download").await;
    assert_eq!(download["params"]["filename"], "screenshot.png");
    assert_eq!(download["params"]["saveAs"], true);

    let completed = next_matching(&mut seen, |v| v["method"] == "capture.completed").await;
    assert_eq!(completed["params"]["height"], 1500);
    assert_eq!(completed["params"]["width"], 4);
    assert_eq!(completed["params"]["token"], started["params"]["token"]);
    Ok(())
}

#[tokio::test]
async fn test_stop_restores_page_of_running_session() -> anyhow::Result<()> {
    let config = ServiceConfig::new()
        .with_port(0)
        .with_capture(CaptureOptions::new().with_settle_delay(Duration::ZERO));
    let service = CaptureService::bind(config).await?;
    let url = service.ws_url();

    let (accepted, client) = tokio::join!(service.accept(), connect(url));
    let connected = accepted?;
    let mut client = client?;

    let trigger = json!({
        "id": "33333333-3333-4333-8333-333333333333",
        "type": "event",
        "method": "capture.trigger",
        "params": { "tabId": 3 },
    });
    client.send(Message::Text(trigger.to_string().into())).await?;

    // Captures never come back, so the session waits with the page frozen.
    let (seen_tx, mut seen) = mpsc::unbounded_channel();
    tokio::spawn(respond(
        client,
        |request| match request["method"].as_str().unwrap_or_default() {
            "tabs.captureVisible" => None,
            _ => Some(page_answer(request)),
        },
        seen_tx,
    ));

    next_matching(&mut seen, |v| v["method"] == "tabs.captureVisible").await;
    assert!(connected.orchestrator().session_lock().active().is_some());

    assert!(connected.stop(Duration::from_secs(5)).await);
    assert!(connected.orchestrator().session_lock().active().is_none());

    let restore = next_matching(&mut seen, |v| {
        v["method"] == "script.execute"
            && v["params"]["script"]
                .as_str()
                .unwrap_or_default()
                .contains("undo.pop()")
    })
    .await;
    assert_eq!(restore["tabId"], 3);
    Ok(())
}
