//! LiveReload wire protocol.
//!
//! JSON messages tagged by a `command` field, compatible with the
//! official-7 protocol spoken by livereload.js clients.

use crate::bus::Notification;
use serde::{Deserialize, Serialize};

/// Protocol version advertised in the handshake reply.
pub const PROTOCOL_V7: &str = "http://livereload.com/protocols/official-7";

/// Server name advertised in the handshake reply.
pub const SERVER_NAME: &str = "liveserve";

/// Fixed reply text for commands the server does not understand.
pub const UNKNOWN_COMMAND_REPLY: &str = "HEY";

/// Message received from a browser client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Handshake request.
    Hello,

    /// Client announces readiness; `url` is informational only.
    Info {
        #[serde(default)]
        url: Option<String>,
    },

    /// Anything else, answered with a fixed alert rather than an error.
    #[serde(other)]
    Unknown,
}

impl ClientCommand {
    /// Parse a client message. Malformed JSON and unrecognized commands
    /// both map to `Unknown`; the connection stays open either way.
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or(Self::Unknown)
    }
}

/// Message sent to a browser client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Handshake reply.
    Hello {
        protocols: Vec<String>,
        #[serde(rename = "serverName")]
        server_name: String,
    },

    /// Instruct the client to refresh the given path.
    Reload {
        #[serde(rename = "liveCSS")]
        live_css: bool,
        path: String,
    },

    /// Instruct the client to display a message.
    Alert { message: String },
}

impl ServerMessage {
    pub fn hello() -> Self {
        Self::Hello {
            protocols: vec![PROTOCOL_V7.to_string()],
            server_name: SERVER_NAME.to_string(),
        }
    }

    /// Reload message for an output-relative path, rooted at `/`.
    pub fn reload(path: &str) -> Self {
        Self::Reload {
            live_css: true,
            path: format!("/{}", path.trim_start_matches('/')),
        }
    }

    pub fn alert(message: impl Into<String>) -> Self {
        Self::Alert {
            message: message.into(),
        }
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"command":"alert","message":"internal error"}"#.to_string())
    }
}

impl From<Notification> for ServerMessage {
    fn from(note: Notification) -> Self {
        match note {
            Notification::Refresh(path) => Self::reload(&path),
            Notification::Error(message) => Self::alert(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hello() {
        assert_eq!(
            ClientCommand::parse(r#"{"command": "hello"}"#),
            ClientCommand::Hello
        );
    }

    #[test]
    fn test_parse_info_with_url() {
        assert_eq!(
            ClientCommand::parse(r#"{"command": "info", "url": "http://localhost:8000/"}"#),
            ClientCommand::Info {
                url: Some("http://localhost:8000/".to_string())
            }
        );
    }

    #[test]
    fn test_unrecognized_and_malformed_are_unknown() {
        assert_eq!(
            ClientCommand::parse(r#"{"command": "frobnicate"}"#),
            ClientCommand::Unknown
        );
        assert_eq!(ClientCommand::parse("not json"), ClientCommand::Unknown);
        assert_eq!(ClientCommand::parse(r#"{"foo": 1}"#), ClientCommand::Unknown);
    }

    #[test]
    fn test_hello_reply_wire_format() {
        let json = ServerMessage::hello().to_json();
        assert!(json.contains(r#""command":"hello""#));
        assert!(json.contains(r#""serverName":"liveserve""#));
        assert!(json.contains(PROTOCOL_V7));
    }

    #[test]
    fn test_reload_wire_format() {
        let json = ServerMessage::reload("blog/post.html").to_json();
        assert!(json.contains(r#""command":"reload""#));
        assert!(json.contains(r#""liveCSS":true"#));
        assert!(json.contains(r#""path":"/blog/post.html""#));
    }

    #[test]
    fn test_reload_path_not_double_rooted() {
        let ServerMessage::Reload { path, .. } = ServerMessage::reload("/already/rooted") else {
            panic!("expected reload");
        };
        assert_eq!(path, "/already/rooted");
    }

    #[test]
    fn test_notification_translation() {
        assert_eq!(
            ServerMessage::from(Notification::Refresh("a.html".into())),
            ServerMessage::reload("a.html")
        );
        assert_eq!(
            ServerMessage::from(Notification::Error("build broke".into())),
            ServerMessage::alert("build broke")
        );
    }
}
