//! Connection demultiplexing.
//!
//! Both protocols share one listening port. The request head is
//! inspected with MSG_PEEK so an upgrade request reaches the WebSocket
//! handshake unconsumed, while plain requests fall through to the
//! static-file side. Runs on a pool worker, never on the accept thread,
//! and gives up on a stalled head after a bounded wait.

use std::io;
use std::net::TcpStream;
use std::time::{Duration, Instant};

/// Largest request head we will peek at. Anything bigger is treated as
/// a plain request.
const PEEK_LIMIT: usize = 8192;

/// Wall-clock budget for receiving a complete request head. Browsers
/// open speculative connections that may send nothing or stop mid-head;
/// those must not pin a worker.
const HEAD_DEADLINE: Duration = Duration::from_secs(2);

/// Pause between peeks while waiting for more of the head to arrive.
const PEEK_RETRY: Duration = Duration::from_millis(5);

/// True when the connection opens with a websocket upgrade request.
/// Leaves the stream's data untouched; sets a read timeout on it.
/// A head still incomplete at the deadline classifies as plain, so the
/// static-file side answers or fails the connection.
pub fn is_upgrade_request(stream: &TcpStream) -> io::Result<bool> {
    stream.set_read_timeout(Some(HEAD_DEADLINE))?;
    let deadline = Instant::now() + HEAD_DEADLINE;

    let mut buf = [0u8; PEEK_LIMIT];
    let mut last_len = 0;
    loop {
        let n = stream.peek(&mut buf)?;
        if n == 0 {
            // Peer closed before sending a full head.
            return Ok(false);
        }
        if let Some(end) = find_head_end(&buf[..n]) {
            return Ok(has_upgrade_header(&buf[..end]));
        }
        if n == PEEK_LIMIT || Instant::now() >= deadline {
            return Ok(false);
        }
        if n == last_len {
            // No new bytes since the last peek; give the client a moment.
            std::thread::sleep(PEEK_RETRY);
        }
        last_len = n;
    }
}

fn find_head_end(head: &[u8]) -> Option<usize> {
    head.windows(4).position(|w| w == b"\r\n\r\n")
}

fn has_upgrade_header(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head);
    text.lines().skip(1).any(|line| {
        let Some((name, value)) = line.split_once(':') else {
            return false;
        };
        name.trim().eq_ignore_ascii_case("upgrade")
            && value.trim().eq_ignore_ascii_case("websocket")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_plain_request_is_not_upgrade() {
        let head = b"GET /index.html HTTP/1.1\r\nHost: localhost\r\n\r\n";
        assert!(!has_upgrade_header(&head[..find_head_end(head).unwrap()]));
    }

    #[test]
    fn test_upgrade_request_detected() {
        let head = b"GET /livereload HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: x\r\n\r\n";
        assert!(has_upgrade_header(&head[..find_head_end(head).unwrap()]));
    }

    #[test]
    fn test_upgrade_header_case_insensitive() {
        let head = b"GET / HTTP/1.1\r\nUPGRADE: WebSocket\r\n\r\n";
        assert!(has_upgrade_header(&head[..find_head_end(head).unwrap()]));
    }

    #[test]
    fn test_upgrade_value_must_be_websocket() {
        let head = b"GET / HTTP/1.1\r\nUpgrade: h2c\r\n\r\n";
        assert!(!has_upgrade_header(&head[..find_head_end(head).unwrap()]));
    }

    #[test]
    fn test_request_line_mentioning_upgrade_ignored() {
        // Only header lines count, not the request target.
        let head = b"GET /upgrade:websocket HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(!has_upgrade_header(&head[..find_head_end(head).unwrap()]));
    }

    #[test]
    fn test_partial_head_resolves_as_plain_at_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        // Head without the blank-line terminator, then silence.
        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n").unwrap();

        let start = Instant::now();
        assert!(!is_upgrade_request(&server).unwrap());
        assert!(start.elapsed() >= HEAD_DEADLINE);
        assert!(start.elapsed() < HEAD_DEADLINE * 2);
    }
}
