//! Fitting server: serves the virtual try-on demo over HTTP, as a multipart
//! JPEG overlay stream plus JSON endpoints for garment preprocessing,
//! catalog navigation and position adjustment.
//!
//! The try-on pipeline lives in the `fitmirror` library; this binary is
//! transport glue. HTTP framing is deliberately minimal: one request per
//! connection, `Connection: close`, no keep-alive.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use fitmirror::camera::OpenCvCamera;
use fitmirror::config::Config;
use fitmirror::garment::{preprocess_garments, BodyMeasurements, GarmentCatalog};
use fitmirror::overlay::Direction;
use fitmirror::pose::PoseDetector;
use fitmirror::stream::{
    OverlayStream, SharedTryOn, StreamSettings, MULTIPART_CONTENT_TYPE,
};

const CONFIG_PATH: &str = "fitmirror.toml";

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

type LogFile = Arc<Mutex<std::io::BufWriter<std::fs::File>>>;

fn open_log_file() -> Result<LogFile> {
    std::fs::create_dir_all("logs")?;
    let ts = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = format!("logs/fitting_{}.log", ts);
    let file = std::fs::File::create(&path)?;
    eprintln!("Log: {}", path);
    Ok(Arc::new(Mutex::new(std::io::BufWriter::new(file))))
}

macro_rules! log {
    ($logfile:expr, $($arg:tt)*) => {{
        let msg = format!($($arg)*);
        eprintln!("{}", msg);
        if let Ok(mut f) = $logfile.lock() {
            let _ = writeln!(f, "{}", msg);
            let _ = f.flush();
        }
    }};
}

// ---------------------------------------------------------------------------
// Minimal HTTP plumbing
// ---------------------------------------------------------------------------

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(stream: &mut TcpStream) -> Result<Request> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = find_subslice(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            bail!("request head too large");
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            bail!("connection closed mid-request");
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = std::str::from_utf8(&buf[..head_end]).context("non-UTF8 request head")?;
    let mut lines = head.lines();
    let request_line = lines.next().context("empty request")?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().context("missing method")?.to_string();
    let target = parts.next().context("missing request target")?;
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut content_length = 0usize;
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    if content_length > MAX_BODY_BYTES {
        bail!("request body too large ({content_length} bytes)");
    }

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            bail!("connection closed mid-body");
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Request { method, path, body })
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    Ok(())
}

async fn write_json(stream: &mut TcpStream, status: &str, value: serde_json::Value) -> Result<()> {
    write_response(stream, status, "application/json", value.to_string().as_bytes()).await
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                match u8::from_str_radix(hex, 16) {
                    Ok(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    Err(_) => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn form_value(body: &[u8], name: &str) -> Option<String> {
    let text = std::str::from_utf8(body).ok()?;
    text.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (percent_decode(key) == name).then(|| percent_decode(value))
    })
}

// ---------------------------------------------------------------------------
// Shared server context
// ---------------------------------------------------------------------------

struct ServerContext {
    config: Config,
    shared: Arc<SharedTryOn>,
    shutdown: CancellationToken,
    fatal: AtomicBool,
    logfile: LogFile,
}

impl ServerContext {
    /// Catalog load failures are fatal: the server must never keep serving
    /// with a cursor pointing at an unloadable garment.
    fn fail_fatally(&self, error: &dyn std::fmt::Display) {
        log!(self.logfile, "[catalog] fatal: {}", error);
        self.fatal.store(true, Ordering::Relaxed);
        self.shutdown.cancel();
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>fitmirror</title>
<style>
body { font-family: sans-serif; margin: 2em; background: #111; color: #eee; }
img { border: 1px solid #444; }
button, input { margin: 0.2em; }
</style>
</head>
<body>
<h1>fitmirror</h1>
<form id="measure">
  Shoulder width (cm) <input name="shoulder_width" value="45">
  Torso height (cm) <input name="torso_height" value="60">
  <button type="submit">Resize shirts</button>
</form>
<p>
  <button onclick="hit('/previous_shirt')">&#9664; Prev shirt</button>
  <button onclick="hit('/next_shirt')">Next shirt &#9654;</button>
  <button onclick="adjust('up')">Up</button>
  <button onclick="adjust('down')">Down</button>
  <button onclick="adjust('left')">Left</button>
  <button onclick="adjust('right')">Right</button>
</p>
<img src="/virtual_fitting" width="960" height="720">
<script>
async function hit(path) { await fetch(path); }
async function adjust(direction) {
  await fetch('/adjust_position', {
    method: 'POST',
    headers: {'Content-Type': 'application/json'},
    body: JSON.stringify({direction})
  });
}
document.getElementById('measure').addEventListener('submit', async (e) => {
  e.preventDefault();
  await fetch('/process_shirts', {
    method: 'POST',
    headers: {'Content-Type': 'application/x-www-form-urlencoded'},
    body: new URLSearchParams(new FormData(e.target))
  });
});
</script>
</body>
</html>
"#;

async fn handle_process_shirts(
    stream: &mut TcpStream,
    ctx: &Arc<ServerContext>,
    body: &[u8],
) -> Result<()> {
    let shoulder = form_value(body, "shoulder_width").and_then(|v| v.trim().parse::<f32>().ok());
    let torso = form_value(body, "torso_height").and_then(|v| v.trim().parse::<f32>().ok());
    let (Some(shoulder), Some(torso)) = (shoulder, torso) else {
        return write_json(
            stream,
            "400 Bad Request",
            json!({"error": "shoulder_width and torso_height must be numbers"}),
        )
        .await;
    };
    let measurements = match BodyMeasurements::new(shoulder, torso) {
        Ok(m) => m,
        Err(e) => {
            return write_json(stream, "400 Bad Request", json!({"error": e.to_string()})).await;
        }
    };

    log!(
        ctx.logfile,
        "[garment] preprocessing: shoulder={}cm torso={}cm",
        shoulder,
        torso
    );

    let source = std::path::PathBuf::from(&ctx.config.garment.source_dir);
    let processed = std::path::PathBuf::from(&ctx.config.garment.processed_dir);
    let sizing = ctx.config.sizing;
    let report = tokio::task::spawn_blocking(move || {
        preprocess_garments(&source, &processed, measurements, sizing)
    })
    .await
    .context("preprocess task panicked")?;

    match report {
        Ok(report) => {
            log!(
                ctx.logfile,
                "[garment] preprocessing complete: {} processed, {} skipped",
                report.processed,
                report.skipped
            );
            write_json(
                stream,
                "200 OK",
                json!({
                    "message": "Shirts processed successfully!",
                    "processed": report.processed,
                    "skipped": report.skipped,
                }),
            )
            .await
        }
        Err(e) => {
            log!(ctx.logfile, "[garment] preprocessing failed: {e:#}");
            write_json(
                stream,
                "500 Internal Server Error",
                json!({"error": e.to_string()}),
            )
            .await
        }
    }
}

async fn handle_cycle(stream: &mut TcpStream, ctx: &Arc<ServerContext>, forward: bool) -> Result<()> {
    let shared = Arc::clone(&ctx.shared);
    let result = tokio::task::spawn_blocking(move || {
        let mut catalog = shared.catalog.lock().unwrap();
        let moved = if forward {
            catalog.advance()
        } else {
            catalog.retreat()
        };
        moved.map(|index| (index, catalog.active_file().to_string()))
    })
    .await
    .context("catalog task panicked")?;

    match result {
        Ok((index, file)) => {
            log!(ctx.logfile, "[catalog] active {} ({})", index, file);
            write_json(stream, "200 OK", json!({"active_index": index})).await
        }
        Err(e) => {
            // Never keep serving with a broken active garment
            ctx.fail_fatally(&e);
            write_json(
                stream,
                "500 Internal Server Error",
                json!({"error": e.to_string()}),
            )
            .await
        }
    }
}

async fn handle_adjust(stream: &mut TcpStream, ctx: &Arc<ServerContext>, body: &[u8]) -> Result<()> {
    #[derive(serde::Deserialize)]
    struct AdjustRequest {
        direction: Direction,
    }

    let request: AdjustRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return write_json(stream, "400 Bad Request", json!({"error": e.to_string()})).await;
        }
    };

    let offset = ctx
        .shared
        .offset
        .nudge(request.direction, ctx.config.placement.nudge_step);
    write_json(
        stream,
        "200 OK",
        json!({
            "vertical_offset": offset.vertical,
            "horizontal_offset": offset.horizontal,
        }),
    )
    .await
}

async fn handle_stream(stream: &mut TcpStream, ctx: &Arc<ServerContext>) -> Result<()> {
    // Each connection owns its camera handle and loop instance
    let camera = match OpenCvCamera::open(ctx.config.camera.index) {
        Ok(camera) => camera,
        Err(e) => {
            log!(ctx.logfile, "[stream] camera unavailable: {e:#}");
            return write_json(
                stream,
                "503 Service Unavailable",
                json!({"error": "camera unavailable"}),
            )
            .await;
        }
    };
    let detector = match PoseDetector::new(&ctx.config.pose.model_path) {
        Ok(detector) => detector,
        Err(e) => {
            log!(ctx.logfile, "[stream] pose model unavailable: {e:#}");
            return write_json(
                stream,
                "500 Internal Server Error",
                json!({"error": "pose model unavailable"}),
            )
            .await;
        }
    };

    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {MULTIPART_CONTENT_TYPE}\r\nCache-Control: no-cache\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(head.as_bytes()).await?;

    let session = ctx.shutdown.child_token();
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Bytes>(4);

    let settings = StreamSettings::from(&ctx.config);
    let shared = Arc::clone(&ctx.shared);
    let producer_token = session.clone();
    let producer = tokio::task::spawn_blocking(move || {
        let mut overlay = OverlayStream::new(camera, detector, shared, settings, producer_token);
        while let Some(chunk) = overlay.next_chunk() {
            if tx.blocking_send(chunk).is_err() {
                break;
            }
        }
        // camera handle released here with the loop instance
    });

    while let Some(chunk) = rx.recv().await {
        if stream.write_all(&chunk).await.is_err() {
            // client disconnected
            break;
        }
    }
    session.cancel();
    let _ = producer.await;

    Ok(())
}

async fn handle_connection(mut stream: TcpStream, ctx: Arc<ServerContext>) -> Result<()> {
    let request = read_request(&mut stream).await?;

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => write_response(&mut stream, "200 OK", "text/html", INDEX_HTML.as_bytes()).await,
        ("POST", "/process_shirts") => handle_process_shirts(&mut stream, &ctx, &request.body).await,
        ("GET", "/virtual_fitting") => handle_stream(&mut stream, &ctx).await,
        ("GET", "/next_shirt") => handle_cycle(&mut stream, &ctx, true).await,
        ("GET", "/previous_shirt") => handle_cycle(&mut stream, &ctx, false).await,
        ("POST", "/adjust_position") => handle_adjust(&mut stream, &ctx, &request.body).await,
        _ => {
            write_json(
                &mut stream,
                "404 Not Found",
                json!({"error": "no such route"}),
            )
            .await
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load_or_default(CONFIG_PATH);
    let logfile = open_log_file()?;
    log!(logfile, "Fitting Server ({})", env!("GIT_VERSION"));
    log!(
        logfile,
        "[config] listen_addr={}, camera={}, garments: {} -> {}",
        config.server.listen_addr,
        config.camera.index,
        config.garment.source_dir,
        config.garment.processed_dir
    );

    // The processed store must hold at least one loadable garment before
    // streaming can start; a broken store aborts startup.
    std::fs::create_dir_all(&config.garment.processed_dir)?;
    let catalog = match GarmentCatalog::open(&config.garment.processed_dir) {
        Ok(catalog) => catalog,
        Err(e) => {
            log!(logfile, "[catalog] {e}");
            log!(
                logfile,
                "[catalog] populate {} first (preprocess_garments, or POST /process_shirts after seeding)",
                config.garment.processed_dir
            );
            bail!("cannot start without a loadable garment catalog");
        }
    };
    log!(
        logfile,
        "[catalog] {} garments, active: {}",
        catalog.len(),
        catalog.active_file()
    );

    let shutdown = CancellationToken::new();
    {
        let token = shutdown.clone();
        let mut signals = signal_hook::iterator::Signals::new([
            signal_hook::consts::SIGINT,
            signal_hook::consts::SIGTERM,
        ])?;
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                eprintln!("[signal] shutdown requested");
                token.cancel();
            }
        });
    }

    let ctx = Arc::new(ServerContext {
        shared: SharedTryOn::new(catalog, Default::default()),
        shutdown: shutdown.clone(),
        fatal: AtomicBool::new(false),
        logfile: logfile.clone(),
        config,
    });

    let listener = TcpListener::bind(&ctx.config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", ctx.config.server.listen_addr))?;
    log!(logfile, "Listening on http://{}", ctx.config.server.listen_addr);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                stream.set_nodelay(true)?;
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        eprintln!("[http] {addr}: {e:#}");
                    }
                });
            }
        }
    }

    log!(logfile, "Server stopped");
    if ctx.fatal.load(Ordering::Relaxed) {
        bail!("stopped after fatal garment catalog error");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_subslice() {
        assert_eq!(find_subslice(b"GET / HTTP/1.1\r\n\r\nrest", b"\r\n\r\n"), Some(14));
        assert_eq!(find_subslice(b"no terminator", b"\r\n\r\n"), None);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a+b%20c"), "a b c");
        assert_eq!(percent_decode("45.5"), "45.5");
        assert_eq!(percent_decode("bad%zz"), "bad%zz");
    }

    #[test]
    fn test_form_value() {
        let body = b"shoulder_width=45.5&torso_height=60";
        assert_eq!(form_value(body, "shoulder_width").as_deref(), Some("45.5"));
        assert_eq!(form_value(body, "torso_height").as_deref(), Some("60"));
        assert_eq!(form_value(body, "missing"), None);
    }
}
