use std::io;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

pub const HEADER_JOIN: &str = "JOIN";
pub const HEADER_BROADCAST: &str = "BROADCAST";

/// Inbound packet: a JSON object with arbitrary fields
pub type Packet = Map<String, Value>;

/// Server -> Client presence messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "header", rename_all = "UPPERCASE")]
pub enum ServerMessage {
    /// A player joined; `party` includes the joiner
    Join { player: String, party: Vec<String> },
    /// A player left; `party` holds the remaining members only
    Leave { player: String, party: Vec<String> },
}

impl ServerMessage {
    /// Serialize to a single newline-terminated line
    pub fn to_frame(&self) -> serde_json::Result<Bytes> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(Bytes::from(line))
    }
}

/// Reasons a connection never gets past its first line
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("failed to read join packet: {0}")]
    Read(#[from] io::Error),
    #[error("timed out waiting for join packet")]
    TimedOut,
    #[error("failed to parse join packet: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("invalid join packet header")]
    NotJoin,
    #[error("missing room id")]
    MissingRoom,
    #[error("missing player name")]
    MissingName,
}

/// The handshake line: `{"header":"JOIN","room":..,"name":..}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub room: String,
    /// Pseudonymous id, used verbatim as the membership key
    pub name: String,
}

impl JoinRequest {
    pub fn from_packet(packet: &Packet) -> Result<Self, HandshakeError> {
        if packet_header(packet) != Some(HEADER_JOIN) {
            return Err(HandshakeError::NotJoin);
        }
        let room = packet
            .get("room")
            .and_then(Value::as_str)
            .ok_or(HandshakeError::MissingRoom)?;
        let name = packet
            .get("name")
            .and_then(Value::as_str)
            .ok_or(HandshakeError::MissingName)?;

        Ok(Self {
            room: room.to_owned(),
            name: name.to_owned(),
        })
    }

    pub fn parse(line: &[u8]) -> Result<Self, HandshakeError> {
        Self::from_packet(&parse_packet(line)?)
    }
}

pub fn parse_packet(line: &[u8]) -> serde_json::Result<Packet> {
    serde_json::from_slice(line)
}

pub fn packet_header(packet: &Packet) -> Option<&str> {
    packet.get("header").and_then(Value::as_str)
}

/// Blank lines are heartbeats
pub fn is_heartbeat(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Read one line, up to and including `\n`, into `buf`.
///
/// At most `max_len` bytes are buffered; a longer line is `InvalidData`.
/// A stream that ends before the newline is reported as `UnexpectedEof`;
/// a partial trailing line never counts as a frame.
pub async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>, max_len: usize) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut limited = (&mut *reader).take(max_len as u64);
    limited.read_until(b'\n', buf).await?;
    if buf.last() == Some(&b'\n') {
        return Ok(());
    }
    if buf.len() >= max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {} bytes", max_len),
        ));
    }
    Err(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed before end of line",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[test]
    fn join_request_keeps_name_verbatim() {
        let join = JoinRequest::parse(br#"{"header":"JOIN","room":"r1","name":"  Na/+= "}"#)
            .unwrap();
        assert_eq!(
            join,
            JoinRequest {
                room: "r1".into(),
                name: "  Na/+= ".into(),
            }
        );
    }

    #[test]
    fn join_request_validation() {
        assert!(matches!(
            JoinRequest::parse(b"{not json"),
            Err(HandshakeError::Malformed(_))
        ));
        assert!(matches!(
            JoinRequest::parse(b"[\"JOIN\"]"),
            Err(HandshakeError::Malformed(_))
        ));
        assert!(matches!(
            JoinRequest::parse(br#"{"header":"BROADCAST","room":"r1","name":"Na"}"#),
            Err(HandshakeError::NotJoin)
        ));
        assert!(matches!(
            JoinRequest::parse(br#"{"room":"r1","name":"Na"}"#),
            Err(HandshakeError::NotJoin)
        ));
        assert!(matches!(
            JoinRequest::parse(br#"{"header":"JOIN","room":7,"name":"Na"}"#),
            Err(HandshakeError::MissingRoom)
        ));
        assert!(matches!(
            JoinRequest::parse(br#"{"header":"JOIN","room":"r1"}"#),
            Err(HandshakeError::MissingName)
        ));
    }

    #[test]
    fn presence_frames_are_single_json_lines() {
        let frame = ServerMessage::Join {
            player: "Nb".into(),
            party: vec!["Na".into(), "Nb".into()],
        }
        .to_frame()
        .unwrap();
        assert_eq!(
            &frame[..],
            &b"{\"header\":\"JOIN\",\"player\":\"Nb\",\"party\":[\"Na\",\"Nb\"]}\n"[..]
        );

        let frame = ServerMessage::Leave {
            player: "Na".into(),
            party: vec![],
        }
        .to_frame()
        .unwrap();
        assert_eq!(
            &frame[..],
            &b"{\"header\":\"LEAVE\",\"player\":\"Na\",\"party\":[]}\n"[..]
        );
    }

    #[test]
    fn heartbeat_detection() {
        assert!(is_heartbeat(b"\n"));
        assert!(is_heartbeat(b" \t\r\n"));
        assert!(!is_heartbeat(b"{}\n"));
    }

    #[tokio::test]
    async fn read_frame_requires_newline() {
        let mut reader = BufReader::new(&b"{\"a\":1}\n\n{\"partial\""[..]);
        let mut buf = Vec::new();

        read_frame(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(buf, b"{\"a\":1}\n");

        read_frame(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(buf, b"\n");

        let err = read_frame(&mut reader, &mut buf, 64).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let err = read_frame(&mut reader, &mut buf, 64).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn read_frame_caps_line_length() {
        let mut reader = BufReader::new(&b"12345678\n123456789\n"[..]);
        let mut buf = Vec::new();

        // Exactly at the limit, newline included
        read_frame(&mut reader, &mut buf, 9).await.unwrap();
        assert_eq!(buf, b"12345678\n");

        let err = read_frame(&mut reader, &mut buf, 9).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(buf.len(), 9);
    }

    #[tokio::test]
    async fn oversized_line_stops_buffering_at_the_limit() {
        let mut line = b"{\"header\":\"BROADCAST\",\"pad\":\"".to_vec();
        line.resize(4 * 1024 * 1024, b' ');
        line.extend_from_slice(b"\"}\n");
        let mut reader = BufReader::new(&line[..]);
        let mut buf = Vec::new();

        let err = read_frame(&mut reader, &mut buf, 1024).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert_eq!(buf.len(), 1024);
    }

    #[test]
    fn unknown_headers_still_parse() {
        let packet = parse_packet(br#"{"header":"MESSAGE","text":"hi"}"#).unwrap();
        assert_eq!(packet_header(&packet), Some("MESSAGE"));

        let packet = parse_packet(br#"{"header":5}"#).unwrap();
        assert_eq!(packet_header(&packet), None);
    }
}
