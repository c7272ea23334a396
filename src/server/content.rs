//! Static content handling: path resolution, snippet injection, and the
//! fixed bodies (robots policy, bundled client script, 404 page).

use std::borrow::Cow;
use std::path::{Path, PathBuf};

/// URL path of the bundled client script. Always served from memory,
/// never from the output directory.
pub const CLIENT_SCRIPT_PATH: &str = "/livereload.js";

/// Bundled LiveReload client.
pub const CLIENT_SCRIPT: &str = include_str!("livereload.js");

/// Fixed robots policy: a development server should never be crawled,
/// whatever the output directory contains.
pub const ROBOTS_BODY: &str = "User-Agent: *\nDisallow: /\n";

/// Bootstrap snippet injected into HTML pages. Resolves the script URL
/// from the page's own host so it works through port forwards.
pub fn bootstrap_snippet(port: u16) -> String {
    format!(
        "<script>document.write('<script src=\"http://' \
+ (location.host || 'localhost').split(':')[0] \
+ ':{port}/livereload.js?snipver=1\"></' + 'script>')</script>"
    )
}

/// Inject `snippet` immediately before the first case-insensitive
/// `</head>`. Bodies without a head tag pass through unchanged; callers
/// gate on the content type so non-HTML bodies stay byte-identical.
pub fn inject_snippet(body: Vec<u8>, snippet: &str) -> Vec<u8> {
    const PATTERN: &[u8] = b"</head>";
    let Some(pos) = body
        .windows(PATTERN.len())
        .position(|w| w.eq_ignore_ascii_case(PATTERN))
    else {
        return body;
    };
    let mut out = Vec::with_capacity(body.len() + snippet.len());
    out.extend_from_slice(&body[..pos]);
    out.extend_from_slice(snippet.as_bytes());
    out.extend_from_slice(&body[pos..]);
    out
}

/// Resolve a request target to an existing file under the output
/// directory. Directories resolve to their index file. Anything
/// escaping the output root is rejected, whether via dot segments,
/// percent-encoding or symlinks.
pub fn resolve(target: &str, output: &Path, index: &str) -> Option<PathBuf> {
    let clean = normalize_target(target);
    if clean.split('/').any(|segment| segment == "..") {
        return None;
    }

    let local = output.join(&clean);

    // Canonicalize both sides so symlinked escapes are caught too.
    let canonical = local.canonicalize().ok()?;
    let root = output.canonicalize().ok()?;
    if !canonical.starts_with(&root) {
        return None;
    }

    if canonical.is_dir() {
        let idx = canonical.join(index);
        return idx.is_file().then_some(idx);
    }
    canonical.is_file().then_some(canonical)
}

/// Decode, strip query string and fragment, trim slashes.
fn normalize_target(target: &str) -> String {
    use percent_encoding::percent_decode_str;
    let path = target.split(['?', '#']).next().unwrap_or(target);
    let decoded = percent_decode_str(path)
        .decode_utf8()
        .map(Cow::into_owned)
        .unwrap_or_default();
    decoded.trim_matches('/').to_string()
}

/// HTML body for unresolved paths. Carries a head tag so the reload
/// snippet lands in error pages too and the browser recovers once the
/// file appears.
pub fn not_found_body(target: &str) -> String {
    format!(
        "<html>\n<head>\n</head>\n<body>\nERROR 404: {}\n</body>\n</html>\n",
        escape(target)
    )
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
