//! STOMP 1.2 frame codec
//!
//! Frames travel one per WebSocket text message:
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! \n
//! body\0
//! ```
//!
//! Header values are escaped (`\\`, `\n`, `\r`, `\c`) except on CONNECT and
//! CONNECTED frames. A message consisting only of end-of-line characters is a
//! heart-beat and decodes to `None`.

use crate::error::StompError;
use std::fmt::Write as _;

/// STOMP frame command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StompCommand {
    /// Client handshake; `STOMP` decodes to this too
    Connect,
    /// Broker handshake reply
    Connected,
    /// Start receiving a destination
    Subscribe,
    /// Stop receiving a destination
    Unsubscribe,
    /// Client publish
    Send,
    /// Broker delivery on a subscription
    Message,
    /// Broker acknowledgement of a receipt request
    Receipt,
    /// Broker failure; the connection closes after it
    Error,
    /// Graceful close
    Disconnect,
}

impl StompCommand {
    /// Wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Result<Self, StompError> {
        Ok(match s {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }

    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

/// One STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    /// Frame command
    pub command: StompCommand,
    /// Headers in wire order
    pub headers: Vec<(String, String)>,
    /// Body without the NUL terminator
    pub body: String,
}

impl StompFrame {
    /// Frame without headers or body
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Append a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of `name`; later repeats are ignored
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// CONNECT frame carrying the bearer token
    pub fn connect(host: &str, bearer: &str) -> Self {
        Self::new(StompCommand::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", format!("Bearer {bearer}"))
    }

    /// SUBSCRIBE with automatic acknowledgement
    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(StompCommand::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    /// UNSUBSCRIBE by subscription id
    pub fn unsubscribe(id: &str) -> Self {
        Self::new(StompCommand::Unsubscribe).header("id", id)
    }

    /// DISCONNECT
    pub fn disconnect() -> Self {
        Self::new(StompCommand::Disconnect)
    }

    /// Render to wire text including the NUL terminator
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                let _ = writeln!(out, "{}:{}", escape_header(name), escape_header(value));
            } else {
                let _ = writeln!(out, "{name}:{value}");
            }
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            let _ = writeln!(out, "content-length:{}", self.body.len());
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse wire text; heart-beats yield `Ok(None)`
    pub fn decode(text: &str) -> Result<Option<Self>, StompError> {
        let text = text.trim_start_matches(|c: char| c == '\r' || c == '\n');
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = split_head(text).ok_or(StompError::Unterminated)?;
        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

        let command = StompCommand::parse(lines.next().ok_or(StompError::Empty)?)?;
        let escape = command.escapes_headers();

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
            if escape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let frame = Self {
            command,
            headers,
            body: String::new(),
        };

        let body = match frame.get("content-length").and_then(|v| v.parse::<usize>().ok()) {
            Some(len) if rest.len() > len && rest.is_char_boundary(len) => {
                if rest.as_bytes()[len] != 0 {
                    return Err(StompError::Unterminated);
                }
                &rest[..len]
            }
            Some(_) => return Err(StompError::Unterminated),
            None => rest.split_once('\0').map(|(b, _)| b).ok_or(StompError::Unterminated)?,
        };

        Ok(Some(Self {
            body: body.to_string(),
            ..frame
        }))
    }
}

/// Split at the blank line ending the header block
fn split_head(text: &str) -> Option<(&str, &str)> {
    let lf = text.find("\n\n").map(|i| (i, 2));
    let crlf = text.find("\r\n\r\n").map(|i| (i, 4));
    let (index, len) = match (lf, crlf) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&text[..index], &text[index + len..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::InvalidEscape),
        }
    }
    Ok(out)
}
