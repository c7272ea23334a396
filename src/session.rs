//! Live-reload protocol sessions.
//!
//! One session per upgraded connection. The handshake/command state
//! machine is pure and testable without sockets; `run` drives it over a
//! tungstenite WebSocket, using short read timeouts so bus notifications
//! are delivered promptly between client messages.

use crate::{
    bus::{Notification, NotificationBus},
    debug,
    protocol::{ClientCommand, ServerMessage, UNKNOWN_COMMAND_REPLY},
};
use std::io::{Read, Write};
use tungstenite::{Message, WebSocket, error::Error as WsError};

/// Connection lifecycle. Linear: Connecting → HandshakeDone → Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    HandshakeDone,
    Closed,
}

/// Protocol state machine, independent of the transport.
pub struct SessionMachine {
    state: SessionState,
    bus: NotificationBus,
}

impl SessionMachine {
    pub fn new(bus: NotificationBus) -> Self {
        Self {
            state: SessionState::Connecting,
            bus,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one inbound command; returns the replies to send, in order.
    pub fn on_command(&mut self, command: ClientCommand) -> Vec<ServerMessage> {
        match command {
            ClientCommand::Hello => {
                self.state = SessionState::HandshakeDone;
                vec![ServerMessage::hello()]
            }
            ClientCommand::Info { url } if self.state == SessionState::HandshakeDone => {
                debug!("session"; "browser connected: {}", url.as_deref().unwrap_or("-"));
                // Hand over everything that queued up while no client
                // was attached. No direct reply of its own.
                self.bus
                    .take_pending()
                    .into_iter()
                    .map(ServerMessage::from)
                    .collect()
            }
            // `info` before the handshake, or any unrecognized command:
            // a fixed alert, never a closed connection.
            _ => vec![ServerMessage::alert(UNKNOWN_COMMAND_REPLY)],
        }
    }

    /// Handle a bus notification. `None` means the transport was not
    /// ready and the message went back to the pending queue.
    pub fn on_notification(&self, note: Notification) -> Option<ServerMessage> {
        if self.state == SessionState::HandshakeDone {
            Some(ServerMessage::from(note))
        } else {
            self.bus.defer(note);
            None
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}

/// Drive a session until the peer disconnects.
///
/// The transport must have a read timeout configured, so the loop can
/// poll the bus subscription between reads. Dropping the subscription on
/// every exit path is what guarantees the bus never accumulates dead
/// subscribers.
pub fn run<S: Read + Write>(mut ws: WebSocket<S>, bus: NotificationBus) {
    let subscription = bus.subscribe();
    let mut machine = SessionMachine::new(bus);

    'outer: loop {
        while let Some(note) = subscription.try_recv() {
            if let Some(msg) = machine.on_notification(note)
                && send(&mut ws, &msg).is_err()
            {
                break 'outer;
            }
        }

        match ws.read() {
            Ok(Message::Text(text)) => {
                debug!("session"; "<--- {}", text);
                for msg in machine.on_command(ClientCommand::parse(&text)) {
                    if send(&mut ws, &msg).is_err() {
                        break 'outer;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            // Ping/pong and binary frames are handled inside tungstenite.
            Ok(_) => {}
            Err(WsError::Io(ref e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                debug!("session"; "read error: {}", e);
                break;
            }
        }
    }

    machine.close();
    debug!("session"; "client disconnected");
    drop(subscription);
}

fn send<S: Read + Write>(ws: &mut WebSocket<S>, msg: &ServerMessage) -> tungstenite::Result<()> {
    let json = msg.to_json();
    debug!("session"; "---> {}", json);
    ws.send(Message::Text(json.into()))
}
