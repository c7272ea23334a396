//! Dual-protocol content server.
//!
//! One TCP listener serves both plain HTTP (static files from the output
//! directory, with the reload snippet injected into HTML) and WebSocket
//! upgrade requests for live-reload sessions. The accept loop only
//! accepts: classification and plain requests run on a small rayon
//! pool, so a client that stalls mid-request cannot block further
//! accepts; each upgraded session gets a dedicated thread for the
//! lifetime of the connection.

mod content;
mod demux;
mod http;
mod mime;

pub use content::{CLIENT_SCRIPT, CLIENT_SCRIPT_PATH, ROBOTS_BODY};

use crate::{bus::NotificationBus, config::SiteConfig, debug, log, session};
use anyhow::{Context, Result};
use std::{
    fs,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

/// Read timeout on session sockets; bounds how long a bus notification
/// can wait behind a blocking read.
const SESSION_POLL: Duration = Duration::from_millis(100);

/// Maximum number of port binding attempts.
const MAX_PORT_RETRIES: u16 = 10;

/// Plain-request worker pool size.
const REQUEST_THREADS: usize = 4;

/// Server registered for graceful shutdown (set once after binding).
static REGISTERED: OnceLock<ShutdownHandle> = OnceLock::new();

/// Setup the global Ctrl+C handler. Call once at program start.
///
/// Before `register_shutdown()` the handler exits the process directly;
/// after it, the handler unblocks the accept loop for a clean teardown.
pub fn setup_shutdown_handler() -> Result<()> {
    ctrlc::set_handler(|| {
        if let Some(handle) = REGISTERED.get() {
            log!("serve"; "shutting down...");
            handle.shutdown();
        } else {
            std::process::exit(0);
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))
}

/// Register the bound server with the Ctrl+C handler.
pub fn register_shutdown(handle: ShutdownHandle) {
    let _ = REGISTERED.set(handle);
}

/// Handle that stops a running server from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl ShutdownHandle {
    /// Request shutdown and unblock the accept loop.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        // The listener blocks in accept(); a throwaway connection wakes
        // it so the flag gets observed.
        let ip = match self.addr.ip() {
            ip if ip.is_unspecified() && ip.is_ipv4() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        let _ = TcpStream::connect_timeout(
            &SocketAddr::new(ip, self.addr.port()),
            Duration::from_millis(500),
        );
    }
}

/// The bound dual-protocol server.
pub struct ContentServer {
    listener: TcpListener,
    addr: SocketAddr,
    output: PathBuf,
    index: String,
    bus: NotificationBus,
    shutdown: Arc<AtomicBool>,
}

impl ContentServer {
    /// Bind to the configured interface and port, with automatic port
    /// retry when the preferred port is taken.
    pub fn bind(config: &SiteConfig, bus: NotificationBus) -> Result<Self> {
        let base_port = config.serve.port;
        for offset in 0..MAX_PORT_RETRIES {
            let port = base_port.saturating_add(offset);
            let addr = SocketAddr::new(config.serve.address, port);

            match TcpListener::bind(addr) {
                Ok(listener) => {
                    if offset > 0 {
                        log!("serve"; "port {} in use, using {} instead", base_port, port);
                    }
                    // Port 0 binds an ephemeral port; report the real one.
                    let addr = listener.local_addr()?;
                    return Ok(Self {
                        listener,
                        addr,
                        output: config.build.output.clone(),
                        index: config.build.index.clone(),
                        bus,
                        shutdown: Arc::new(AtomicBool::new(false)),
                    });
                }
                Err(_) if offset + 1 < MAX_PORT_RETRIES => continue,
                Err(e) => {
                    return Err(anyhow::anyhow!(
                        "failed to bind after {} attempts (ports {}-{}): {}",
                        MAX_PORT_RETRIES,
                        base_port,
                        port,
                        e
                    ));
                }
            }
        }
        unreachable!()
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            addr: self.addr,
        }
    }

    /// Accept connections until shutdown is requested.
    pub fn run(self) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(REQUEST_THREADS)
            .thread_name(|i| format!("liveserve-http-{i}"))
            .build()
            .context("failed to start request worker pool")?;

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    if self.shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    debug!("serve"; "accept failed: {}", e);
                    continue;
                }
            };
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let bus = self.bus.clone();
            let output = self.output.clone();
            let index = self.index.clone();
            let port = self.addr.port();
            pool.spawn(move || handle_connection(stream, peer, bus, &output, &index, port));
        }

        Ok(())
    }
}

/// Classify and dispatch one accepted connection. Runs on a pool
/// worker; the demux gives up on a stalled request head after a bounded
/// wait, so the worker is always returned to the pool.
fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    bus: NotificationBus,
    output: &Path,
    index: &str,
    port: u16,
) {
    match demux::is_upgrade_request(&stream) {
        Ok(true) => {
            debug!("serve"; "websocket upgrade from {}", peer);
            // Sessions are long-lived; give each its own thread rather
            // than tying up a pool worker.
            thread::spawn(move || upgrade_session(stream, bus));
        }
        Ok(false) => {
            if let Err(e) = serve_request(stream, output, index, port) {
                debug!("serve"; "request failed: {:#}", e);
            }
        }
        Err(e) => {
            debug!("serve"; "dropping connection from {}: {}", peer, e);
        }
    }
}

/// Complete the WebSocket handshake and hand the connection to a
/// protocol session. Runs on its own thread.
fn upgrade_session(stream: TcpStream, bus: NotificationBus) {
    use tungstenite::HandshakeError;

    let mut pending = match tungstenite::accept(stream) {
        Ok(ws) => {
            return start_session(ws, bus);
        }
        Err(HandshakeError::Interrupted(mid)) => mid,
        Err(HandshakeError::Failure(e)) => {
            debug!("serve"; "websocket handshake failed: {}", e);
            return;
        }
    };
    // The demux left a read timeout on the stream, so the handshake can
    // be interrupted mid-way and must be resumed.
    loop {
        match pending.handshake() {
            Ok(ws) => return start_session(ws, bus),
            Err(HandshakeError::Interrupted(mid)) => pending = mid,
            Err(HandshakeError::Failure(e)) => {
                debug!("serve"; "websocket handshake failed: {}", e);
                return;
            }
        }
    }
}

fn start_session(ws: tungstenite::WebSocket<TcpStream>, bus: NotificationBus) {
    if ws.get_ref().set_read_timeout(Some(SESSION_POLL)).is_err() {
        return;
    }
    session::run(ws, bus);
}

/// Serve one plain HTTP request and close the connection.
fn serve_request(stream: TcpStream, output: &Path, index: &str, port: u16) -> Result<()> {
    let request = http::read_request(&stream)?;
    debug!("serve"; "{} {}", request.method, request.target);

    match request.path() {
        "/robots.txt" => http::write_response(
            &stream,
            200,
            mime::types::PLAIN,
            ROBOTS_BODY.as_bytes(),
            request.is_head(),
        ),
        CLIENT_SCRIPT_PATH => http::write_response(
            &stream,
            200,
            mime::types::JAVASCRIPT,
            CLIENT_SCRIPT.as_bytes(),
            request.is_head(),
        ),
        path => match content::resolve(path, output, index) {
            Some(file) => {
                let mime = mime::from_path(&file);
                let mut body = fs::read(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                if mime::is_html(mime) {
                    body = content::inject_snippet(body, &content::bootstrap_snippet(port));
                }
                http::write_response(&stream, 200, mime, &body, request.is_head())
            }
            None => {
                // The 404 page carries the snippet too, so a browser
                // sitting on a missing page reloads once it exists.
                let body = content::inject_snippet(
                    content::not_found_body(path).into_bytes(),
                    &content::bootstrap_snippet(port),
                );
                http::write_response(&stream, 404, mime::types::HTML, &body, request.is_head())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiteConfig;
    use std::io::{Read, Write};

    fn test_server(output: &Path) -> (ContentServer, SocketAddr) {
        let mut config = SiteConfig::parse("").unwrap();
        config.serve.port = 0;
        config.build.output = output.to_path_buf();
        let server = ContentServer::bind(&config, NotificationBus::new()).unwrap();
        let addr = server.addr();
        (server, addr)
    }

    fn get(addr: SocketAddr, target: &str) -> String {
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(stream, "GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_serves_files_robots_and_404() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("index.html"),
            "<html><head></head><body>home</body></html>",
        )
        .unwrap();
        fs::write(dir.path().join("plain.txt"), "just text").unwrap();

        let (server, addr) = test_server(dir.path());
        let handle = server.shutdown_handle();
        let runner = thread::spawn(move || server.run());

        let page = get(addr, "/");
        assert!(page.starts_with("HTTP/1.1 200 OK"));
        assert!(page.contains("livereload.js"));

        let text = get(addr, "/plain.txt");
        assert!(text.contains("just text"));
        assert!(!text.contains("livereload.js"));

        let robots = get(addr, "/robots.txt");
        assert!(robots.contains("Disallow: /"));

        let script = get(addr, CLIENT_SCRIPT_PATH);
        assert!(script.contains("WebSocket"));

        let missing = get(addr, "/nope.html");
        assert!(missing.starts_with("HTTP/1.1 404"));
        assert!(missing.contains("livereload.js"));

        handle.shutdown();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_stalled_client_does_not_starve_other_connections() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr) = test_server(dir.path());
        let handle = server.shutdown_handle();
        let runner = thread::spawn(move || server.run());

        // Half-open client: partial request head, then silence.
        let mut stalled = TcpStream::connect(addr).unwrap();
        write!(stalled, "GET / HTTP/1.1\r\nHost: localhost\r\n").unwrap();

        // Other connections must be answered while it lingers.
        let robots = get(addr, "/robots.txt");
        assert!(robots.contains("Disallow: /"));

        // And after it goes away.
        drop(stalled);
        let robots = get(addr, "/robots.txt");
        assert!(robots.contains("Disallow: /"));

        handle.shutdown();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_websocket_handshake_and_hello() {
        let dir = tempfile::tempdir().unwrap();
        let (server, addr) = test_server(dir.path());
        let handle = server.shutdown_handle();
        let runner = thread::spawn(move || server.run());

        let (mut ws, _response) =
            tungstenite::connect(format!("ws://{addr}/livereload")).unwrap();
        ws.send(tungstenite::Message::Text(
            r#"{"command":"hello","protocols":["http://livereload.com/protocols/official-7"]}"#
                .into(),
        ))
        .unwrap();
        let reply = ws.read().unwrap();
        let text = reply.to_text().unwrap();
        assert!(text.contains("\"serverName\":\"liveserve\""));
        assert!(text.contains("official-7"));
        let _ = ws.close(None);

        handle.shutdown();
        runner.join().unwrap().unwrap();
    }
}
