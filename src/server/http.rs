//! Minimal HTTP/1.1 plumbing for the plain-content side of the listener.
//!
//! Only what a development file server needs: read the request line and
//! headers of a GET/HEAD request, write one complete response. Every
//! response closes the connection; keep-alive is not supported.

use anyhow::{Result, bail};
use std::io::{BufRead, BufReader, Read, Write};

/// A parsed plain-content request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Request target as sent, query string included.
    pub target: String,
}

impl HttpRequest {
    pub fn is_head(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// Target with query string and fragment stripped.
    pub fn path(&self) -> &str {
        self.target
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.target)
    }
}

/// Read and parse the head of one request. The body, if any, is ignored.
pub fn read_request<S: Read>(stream: S) -> Result<HttpRequest> {
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        bail!("malformed request line: {line:?}");
    };
    let request = HttpRequest {
        method: method.to_string(),
        target: target.to_string(),
    };

    // Drain header lines up to the blank separator.
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header)?;
        if n == 0 || header == "\r\n" || header == "\n" {
            break;
        }
    }

    Ok(request)
}

/// Write one complete response. `head_only` suppresses the body for
/// HEAD requests while keeping the Content-Length accurate.
pub fn write_response<S: Write>(
    mut stream: S,
    status: u16,
    content_type: &str,
    body: &[u8],
    head_only: bool,
) -> Result<()> {
    let reason = match status {
        200 => "OK",
        404 => "Not Found",
        _ => "Error",
    };
    write!(
        stream,
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    if !head_only {
        stream.write_all(body)?;
    }
    stream.flush()?;
    Ok(())
}
