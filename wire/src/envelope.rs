//! Envelope codec: typed messages to and from the text wire encoding.
//!
//! An envelope serializes to newline-delimited `key=value` records ending
//! with an empty line, the `type` record first. Values escape `\` and
//! newline; binary fields are base64. The type set is closed: decoding an
//! unknown tag yields [`WireError::UnknownType`] so the receiver can log and
//! ignore it without tearing the session down.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::WireError;

/// Error codes carried by `error` envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Token missing or rejected
    Auth,
    /// Handshake material unusable
    Handshake,
    /// Rate limiter rejection
    Rate,
    /// Malformed traffic
    Protocol,
    /// File transfer constraint violated
    Transfer,
}

impl ErrorCode {
    /// Wire spelling of the code
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Auth => "auth",
            ErrorCode::Handshake => "handshake",
            ErrorCode::Rate => "rate",
            ErrorCode::Protocol => "protocol",
            ErrorCode::Transfer => "transfer",
        }
    }

    fn parse(s: &str) -> Result<Self, WireError> {
        match s {
            "auth" => Ok(ErrorCode::Auth),
            "handshake" => Ok(ErrorCode::Handshake),
            "rate" => Ok(ErrorCode::Rate),
            "protocol" => Ok(ErrorCode::Protocol),
            "transfer" => Ok(ErrorCode::Transfer),
            _ => Err(WireError::InvalidField("code")),
        }
    }
}

/// A typed protocol message; the unit of dispatch on both sides.
///
/// Fields the server stamps onto relayed traffic (`sender`, `room`, `ts`,
/// `seq`) are optional because a client-originated envelope does not carry
/// them yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Client opener: public key plus requested identity
    Hello {
        /// PEM-encoded RSA public key (SPKI)
        public_key: String,
        /// Requested display name (sanitized server-side)
        name: String,
        /// Requested room (sanitized server-side)
        room: String,
        /// Auth token, when the server demands one
        token: Option<String>,
    },
    /// Server reply completing the handshake
    SessionInit {
        /// Session key wrapped with the client's public key
        wrapped_key: Vec<u8>,
        /// Server-assigned client id
        client_id: u64,
        /// Server clock, UTC unix milliseconds
        server_time: i64,
    },
    /// Chat line
    Chat {
        /// Display name of the sender (server-stamped)
        sender: Option<String>,
        /// Room the line was sent to (server-stamped)
        room: Option<String>,
        /// Message body
        text: String,
        /// UTC unix milliseconds (server-stamped)
        ts: Option<i64>,
        /// Per-room sequence number (server-stamped)
        seq: Option<u64>,
    },
    /// Server-originated notice
    System {
        /// Notice body
        text: String,
        /// Room the notice concerns
        room: Option<String>,
        /// UTC unix milliseconds
        ts: Option<i64>,
    },
    /// Rename request
    CmdNick {
        /// Requested display name
        name: String,
    },
    /// Room switch request
    CmdJoin {
        /// Target room
        room: String,
    },
    /// Clean disconnect request
    CmdQuit,
    /// File transfer announcement
    FileStart {
        /// Transfer identifier, unique per sender
        transfer_id: String,
        /// Display name of the sender (server-stamped)
        sender: Option<String>,
        /// Original file name
        filename: String,
        /// Total size in bytes
        size: u64,
        /// Number of chunks that will follow
        total_chunks: u32,
    },
    /// One file chunk
    FileChunk {
        /// Transfer identifier
        transfer_id: String,
        /// Display name of the sender (server-stamped)
        sender: Option<String>,
        /// Zero-based chunk index
        index: u32,
        /// Chunk content
        data: Vec<u8>,
    },
    /// Transfer completion marker
    FileEnd {
        /// Transfer identifier
        transfer_id: String,
        /// Display name of the sender (server-stamped)
        sender: Option<String>,
        /// Original file name
        filename: String,
    },
    /// Liveness probe
    Ping {
        /// Echo nonce
        nonce: u64,
    },
    /// Liveness reply
    Pong {
        /// Nonce from the matching ping
        nonce: u64,
    },
    /// Error notice
    Error {
        /// Error category
        code: ErrorCode,
        /// Optional human-readable detail
        detail: Option<String>,
    },
}

impl Envelope {
    /// Wire spelling of the type tag
    pub fn type_name(&self) -> &'static str {
        match self {
            Envelope::Hello { .. } => "hello",
            Envelope::SessionInit { .. } => "session-init",
            Envelope::Chat { .. } => "chat",
            Envelope::System { .. } => "system",
            Envelope::CmdNick { .. } => "cmd-nick",
            Envelope::CmdJoin { .. } => "cmd-join",
            Envelope::CmdQuit => "cmd-quit",
            Envelope::FileStart { .. } => "file-start",
            Envelope::FileChunk { .. } => "file-chunk",
            Envelope::FileEnd { .. } => "file-end",
            Envelope::Ping { .. } => "ping",
            Envelope::Pong { .. } => "pong",
            Envelope::Error { .. } => "error",
        }
    }

    /// Whether this envelope is service traffic rather than relayed content.
    ///
    /// The send-queue overflow policy only evicts non-system envelopes.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            Envelope::System { .. } | Envelope::Error { .. } | Envelope::SessionInit { .. }
        )
    }

    /// Serialize to the wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut rec = Record::new(self.type_name());
        match self {
            Envelope::Hello {
                public_key,
                name,
                room,
                token,
            } => {
                rec.put("public_key", public_key);
                rec.put("name", name);
                rec.put("room", room);
                if let Some(token) = token {
                    rec.put("token", token);
                }
            }
            Envelope::SessionInit {
                wrapped_key,
                client_id,
                server_time,
            } => {
                rec.put("wrapped_key", &BASE64.encode(wrapped_key));
                rec.put("client_id", &client_id.to_string());
                rec.put("server_time", &server_time.to_string());
            }
            Envelope::Chat {
                sender,
                room,
                text,
                ts,
                seq,
            } => {
                rec.put_opt("sender", sender.as_deref());
                rec.put_opt("room", room.as_deref());
                rec.put("text", text);
                rec.put_opt("ts", ts.map(|v| v.to_string()).as_deref());
                rec.put_opt("seq", seq.map(|v| v.to_string()).as_deref());
            }
            Envelope::System { text, room, ts } => {
                rec.put("text", text);
                rec.put_opt("room", room.as_deref());
                rec.put_opt("ts", ts.map(|v| v.to_string()).as_deref());
            }
            Envelope::CmdNick { name } => rec.put("name", name),
            Envelope::CmdJoin { room } => rec.put("room", room),
            Envelope::CmdQuit => {}
            Envelope::FileStart {
                transfer_id,
                sender,
                filename,
                size,
                total_chunks,
            } => {
                rec.put("transfer_id", transfer_id);
                rec.put_opt("sender", sender.as_deref());
                rec.put("filename", filename);
                rec.put("size", &size.to_string());
                rec.put("total_chunks", &total_chunks.to_string());
            }
            Envelope::FileChunk {
                transfer_id,
                sender,
                index,
                data,
            } => {
                rec.put("transfer_id", transfer_id);
                rec.put_opt("sender", sender.as_deref());
                rec.put("index", &index.to_string());
                rec.put("data", &BASE64.encode(data));
            }
            Envelope::FileEnd {
                transfer_id,
                sender,
                filename,
            } => {
                rec.put("transfer_id", transfer_id);
                rec.put_opt("sender", sender.as_deref());
                rec.put("filename", filename);
            }
            Envelope::Ping { nonce } => rec.put("nonce", &nonce.to_string()),
            Envelope::Pong { nonce } => rec.put("nonce", &nonce.to_string()),
            Envelope::Error { code, detail } => {
                rec.put("code", code.as_str());
                rec.put_opt("detail", detail.as_deref());
            }
        }
        rec.finish()
    }

    /// Parse an envelope from the wire encoding.
    pub fn decode(payload: &[u8]) -> Result<Self, WireError> {
        let text = std::str::from_utf8(payload).map_err(|_| WireError::Utf8)?;
        let fields = Fields::parse(text)?;
        let typ = fields.require("type")?;

        match typ {
            "hello" => Ok(Envelope::Hello {
                public_key: fields.require("public_key")?.to_string(),
                name: fields.require("name")?.to_string(),
                room: fields.require("room")?.to_string(),
                token: fields.get("token").map(str::to_string),
            }),
            "session-init" => Ok(Envelope::SessionInit {
                wrapped_key: fields.bytes("wrapped_key")?,
                client_id: fields.u64("client_id")?,
                server_time: fields.i64("server_time")?,
            }),
            "chat" => Ok(Envelope::Chat {
                sender: fields.get("sender").map(str::to_string),
                room: fields.get("room").map(str::to_string),
                text: fields.require("text")?.to_string(),
                ts: fields.opt_i64("ts")?,
                seq: fields.opt_u64("seq")?,
            }),
            "system" => Ok(Envelope::System {
                text: fields.require("text")?.to_string(),
                room: fields.get("room").map(str::to_string),
                ts: fields.opt_i64("ts")?,
            }),
            "cmd-nick" => Ok(Envelope::CmdNick {
                name: fields.require("name")?.to_string(),
            }),
            "cmd-join" => Ok(Envelope::CmdJoin {
                room: fields.require("room")?.to_string(),
            }),
            "cmd-quit" => Ok(Envelope::CmdQuit),
            "file-start" => Ok(Envelope::FileStart {
                transfer_id: fields.require("transfer_id")?.to_string(),
                sender: fields.get("sender").map(str::to_string),
                filename: fields.require("filename")?.to_string(),
                size: fields.u64("size")?,
                total_chunks: fields.u32("total_chunks")?,
            }),
            "file-chunk" => Ok(Envelope::FileChunk {
                transfer_id: fields.require("transfer_id")?.to_string(),
                sender: fields.get("sender").map(str::to_string),
                index: fields.u32("index")?,
                data: fields.bytes("data")?,
            }),
            "file-end" => Ok(Envelope::FileEnd {
                transfer_id: fields.require("transfer_id")?.to_string(),
                sender: fields.get("sender").map(str::to_string),
                filename: fields.require("filename")?.to_string(),
            }),
            "ping" => Ok(Envelope::Ping {
                nonce: fields.u64("nonce")?,
            }),
            "pong" => Ok(Envelope::Pong {
                nonce: fields.u64("nonce")?,
            }),
            "error" => Ok(Envelope::Error {
                code: ErrorCode::parse(fields.require("code")?)?,
                detail: fields.get("detail").map(str::to_string),
            }),
            other => Err(WireError::UnknownType(other.to_string())),
        }
    }
}

/// Builder for the outgoing record block
struct Record {
    buf: String,
}

impl Record {
    fn new(typ: &str) -> Self {
        let mut buf = String::with_capacity(128);
        buf.push_str("type=");
        buf.push_str(typ);
        buf.push('\n');
        Record { buf }
    }

    fn put(&mut self, key: &str, value: &str) {
        self.buf.push_str(key);
        self.buf.push('=');
        escape_into(value, &mut self.buf);
        self.buf.push('\n');
    }

    fn put_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.put(key, value);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.push('\n');
        self.buf.into_bytes()
    }
}

/// Parsed view of an incoming record block
struct Fields<'a> {
    pairs: Vec<(&'a str, String)>,
}

impl<'a> Fields<'a> {
    fn parse(text: &'a str) -> Result<Self, WireError> {
        let mut pairs = Vec::new();
        for line in text.split('\n') {
            if line.is_empty() {
                break;
            }
            let (key, raw) = line.split_once('=').ok_or(WireError::Malformed)?;
            if key.is_empty() {
                return Err(WireError::Malformed);
            }
            pairs.push((key, unescape(raw)?));
        }
        // The type record leads so a reader can dispatch without a full scan.
        match pairs.first() {
            Some(&("type", _)) => Ok(Fields { pairs }),
            _ => Err(WireError::MissingField("type")),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &'static str) -> Result<&str, WireError> {
        self.get(key).ok_or(WireError::MissingField(key))
    }

    fn u64(&self, key: &'static str) -> Result<u64, WireError> {
        self.require(key)?
            .parse()
            .map_err(|_| WireError::InvalidField(key))
    }

    fn u32(&self, key: &'static str) -> Result<u32, WireError> {
        self.require(key)?
            .parse()
            .map_err(|_| WireError::InvalidField(key))
    }

    fn i64(&self, key: &'static str) -> Result<i64, WireError> {
        self.require(key)?
            .parse()
            .map_err(|_| WireError::InvalidField(key))
    }

    fn opt_u64(&self, key: &'static str) -> Result<Option<u64>, WireError> {
        self.get(key)
            .map(|v| v.parse().map_err(|_| WireError::InvalidField(key)))
            .transpose()
    }

    fn opt_i64(&self, key: &'static str) -> Result<Option<i64>, WireError> {
        self.get(key)
            .map(|v| v.parse().map_err(|_| WireError::InvalidField(key)))
            .transpose()
    }

    fn bytes(&self, key: &'static str) -> Result<Vec<u8>, WireError> {
        BASE64
            .decode(self.require(key)?)
            .map_err(|_| WireError::InvalidField(key))
    }
}

fn escape_into(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
}

fn unescape(raw: &str) -> Result<String, WireError> {
    if !raw.contains('\\') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            _ => return Err(WireError::Malformed),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(env: Envelope) {
        let encoded = env.encode();
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn test_hello_roundtrip() {
        roundtrip(Envelope::Hello {
            public_key: "-----BEGIN PUBLIC KEY-----\nMIIB...\n-----END PUBLIC KEY-----\n"
                .to_string(),
            name: "alice".to_string(),
            room: "lobby".to_string(),
            token: Some("t1".to_string()),
        });
        roundtrip(Envelope::Hello {
            public_key: "pem".to_string(),
            name: "bob".to_string(),
            room: "other".to_string(),
            token: None,
        });
    }

    #[test]
    fn test_session_init_roundtrip() {
        roundtrip(Envelope::SessionInit {
            wrapped_key: vec![0, 1, 2, 255, 254],
            client_id: 7,
            server_time: 1_700_000_000_123,
        });
    }

    #[test]
    fn test_chat_roundtrip() {
        roundtrip(Envelope::Chat {
            sender: Some("alice".to_string()),
            room: Some("lobby".to_string()),
            text: "line one\nline two \\ backslash".to_string(),
            ts: Some(1_700_000_000_123),
            seq: Some(0),
        });
        // Client-side chat carries only the text
        roundtrip(Envelope::Chat {
            sender: None,
            room: None,
            text: "hello".to_string(),
            ts: None,
            seq: None,
        });
    }

    #[test]
    fn test_file_envelopes_roundtrip() {
        roundtrip(Envelope::FileStart {
            transfer_id: "alice-notes.txt-17".to_string(),
            sender: Some("alice".to_string()),
            filename: "notes.txt".to_string(),
            size: 8 * 1024 * 1024,
            total_chunks: 256,
        });
        roundtrip(Envelope::FileChunk {
            transfer_id: "alice-notes.txt-17".to_string(),
            sender: None,
            index: 42,
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        });
        roundtrip(Envelope::FileEnd {
            transfer_id: "alice-notes.txt-17".to_string(),
            sender: Some("alice".to_string()),
            filename: "notes.txt".to_string(),
        });
    }

    #[test]
    fn test_control_envelopes_roundtrip() {
        roundtrip(Envelope::CmdNick {
            name: "carol".to_string(),
        });
        roundtrip(Envelope::CmdJoin {
            room: "dev".to_string(),
        });
        roundtrip(Envelope::CmdQuit);
        roundtrip(Envelope::Ping { nonce: u64::MAX });
        roundtrip(Envelope::Pong { nonce: 0 });
        roundtrip(Envelope::Error {
            code: ErrorCode::Rate,
            detail: Some("slow down".to_string()),
        });
        roundtrip(Envelope::System {
            text: "alice joined the room".to_string(),
            room: Some("lobby".to_string()),
            ts: Some(1),
        });
    }

    #[test]
    fn test_unknown_type() {
        let payload = b"type=telemetry\nvalue=1\n\n";
        assert!(matches!(
            Envelope::decode(payload),
            Err(WireError::UnknownType(t)) if t == "telemetry"
        ));
    }

    #[test]
    fn test_type_must_lead() {
        let payload = b"name=alice\ntype=cmd-nick\n\n";
        assert!(matches!(
            Envelope::decode(payload),
            Err(WireError::MissingField("type"))
        ));
    }

    #[test]
    fn test_missing_field() {
        let payload = b"type=chat\n\n";
        assert!(matches!(
            Envelope::decode(payload),
            Err(WireError::MissingField("text"))
        ));
    }

    #[test]
    fn test_invalid_numeric_field() {
        let payload = b"type=ping\nnonce=not-a-number\n\n";
        assert!(matches!(
            Envelope::decode(payload),
            Err(WireError::InvalidField("nonce"))
        ));
    }

    #[test]
    fn test_not_utf8() {
        assert!(matches!(
            Envelope::decode(&[0xFF, 0xFE, 0x00]),
            Err(WireError::Utf8)
        ));
    }

    #[test]
    fn test_bad_escape() {
        let payload = b"type=chat\ntext=bad\\q\n\n";
        assert!(matches!(
            Envelope::decode(payload),
            Err(WireError::Malformed)
        ));
    }
}
