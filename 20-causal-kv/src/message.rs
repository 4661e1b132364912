//! Wire protocol shared by clients and datacenters.
//!
//! Every message is a single JSON object. Objects are self-delimiting, so the
//! reader decodes consecutive values straight off the byte stream without a
//! length prefix. Writers still append a newline after each object, which
//! keeps the stream readable with netcat-style tools and is skipped as
//! whitespace on the receiving side.

use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::model::{CommitRecord, DatacenterId, Dependency, Version};

const READ_CHUNK: usize = 4096;

/// Integer discriminant carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    ClientWrite = 0,
    ClientRead = 1,
    ReplicatedWrite = 2,
}

impl From<MessageType> for u8 {
    fn from(kind: MessageType) -> Self {
        kind as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::ClientWrite),
            1 => Ok(MessageType::ClientRead),
            2 => Ok(MessageType::ReplicatedWrite),
            other => Err(format!("unknown message type {other}")),
        }
    }
}

/// A write shipped from its origin datacenter to a peer, stamped with the
/// causal context of the session that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedWrite {
    pub key: String,
    pub value: String,
    pub timestamp: u64,
    pub datacenter_id: DatacenterId,
    pub dependencies: Vec<Dependency>,
}

impl ReplicatedWrite {
    pub fn version(&self) -> Version {
        Version::new(self.timestamp, self.datacenter_id)
    }

    /// The record this write leaves in the commit history once applied.
    pub fn commit_record(&self) -> CommitRecord {
        Dependency::new(self.key.clone(), self.version())
    }
}

/// Everything a datacenter can receive on one of its connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Message {
    Write { key: String, value: String },
    Read { key: String },
    Replicated(ReplicatedWrite),
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Write { .. } => MessageType::ClientWrite,
            Message::Read { .. } => MessageType::ClientRead,
            Message::Replicated(_) => MessageType::ReplicatedWrite,
        }
    }
}

/// Flat JSON shape of [`Message`]. Optional fields mirror senders that omit
/// zero values, so a missing `datacenter_id` or `timestamp` decodes as 0.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: MessageType,
    key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    datacenter_id: Option<DatacenterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dependencies: Option<Vec<Dependency>>,
}

impl From<Envelope> for Message {
    fn from(envelope: Envelope) -> Self {
        let Envelope {
            kind,
            key,
            value,
            timestamp,
            datacenter_id,
            dependencies,
        } = envelope;
        match kind {
            MessageType::ClientWrite => Message::Write {
                key,
                value: value.unwrap_or_default(),
            },
            MessageType::ClientRead => Message::Read { key },
            MessageType::ReplicatedWrite => Message::Replicated(ReplicatedWrite {
                key,
                value: value.unwrap_or_default(),
                timestamp: timestamp.unwrap_or_default(),
                datacenter_id: datacenter_id.unwrap_or_default(),
                dependencies: dependencies.unwrap_or_default(),
            }),
        }
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        let kind = message.kind();
        match message {
            Message::Write { key, value } => Envelope {
                kind,
                key,
                value: Some(value),
                timestamp: None,
                datacenter_id: None,
                dependencies: None,
            },
            Message::Read { key } => Envelope {
                kind,
                key,
                value: None,
                timestamp: None,
                datacenter_id: None,
                dependencies: None,
            },
            Message::Replicated(write) => Envelope {
                kind,
                key: write.key,
                value: Some(write.value),
                timestamp: Some(write.timestamp),
                datacenter_id: Some(write.datacenter_id),
                dependencies: Some(write.dependencies),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Err,
}

/// Reply to a client request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub status: Status,
}

impl Response {
    pub fn written(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: MessageType::ClientWrite,
            key: key.into(),
            value: Some(value.into()),
            status: Status::Ok,
        }
    }

    pub fn found(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: MessageType::ClientRead,
            key: key.into(),
            value: Some(value.into()),
            status: Status::Ok,
        }
    }

    pub fn missing(key: impl Into<String>) -> Self {
        Self {
            kind: MessageType::ClientRead,
            key: key.into(),
            value: None,
            status: Status::Err,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// Largest value a [`MessageReader`] buffers before giving up on the stream.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Decodes a stream of concatenated JSON values.
///
/// Bytes that arrive after a complete value stay buffered for the next call,
/// and a value split across several reads is reassembled before decoding.
/// An incomplete value is only re-parsed once a closing `}` or `]` arrives,
/// and a value larger than the reader's limit fails the stream.
pub struct MessageReader<R> {
    inner: R,
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known not to hold a complete value.
    scanned: usize,
    limit: usize,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, MAX_MESSAGE_BYTES)
    }

    pub fn with_limit(inner: R, limit: usize) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    /// Returns `Ok(None)` on a clean end of stream.
    pub async fn read_message<T>(&mut self) -> io::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        loop {
            if self.may_hold_value() {
                if let Some(message) = self.try_decode()? {
                    return Ok(Some(message));
                }
            }

            let mut chunk = [0u8; READ_CHUNK];
            let bytes = self.inner.read(&mut chunk).await?;
            if bytes == 0 {
                if self.buffer.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                // Malformed input reports as such rather than as truncation.
                if let Some(message) = self.try_decode()? {
                    return Ok(Some(message));
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream closed in the middle of a message",
                ));
            }
            self.buffer.extend_from_slice(&chunk[..bytes]);
            if self.buffer.len() > self.limit {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("message exceeds {} bytes", self.limit),
                ));
            }
        }
    }

    fn may_hold_value(&self) -> bool {
        self.buffer[self.scanned..]
            .iter()
            .any(|byte| matches!(byte, b'}' | b']'))
    }

    fn try_decode<T>(&mut self) -> io::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let (next, consumed) = {
            let mut values = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<T>();
            let next = values.next();
            (next, values.byte_offset())
        };
        match next {
            Some(Ok(message)) => {
                self.buffer.drain(..consumed);
                self.scanned = 0;
                Ok(Some(message))
            }
            // Incomplete value: wait for more bytes.
            Some(Err(err)) if err.is_eof() => {
                self.scanned = self.buffer.len();
                Ok(None)
            }
            Some(Err(err)) => Err(to_io_error(err)),
            None => {
                self.buffer.clear();
                self.scanned = 0;
                Ok(None)
            }
        }
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replicated() -> ReplicatedWrite {
        ReplicatedWrite {
            key: "b".into(),
            value: "2".into(),
            timestamp: 4,
            datacenter_id: 1,
            dependencies: vec![Dependency::new("a", Version::new(3, 1))],
        }
    }

    #[test]
    fn replicated_write_uses_integer_type_tag() {
        let json = serde_json::to_value(Message::Replicated(replicated())).expect("serialize");
        assert_eq!(
            json,
            serde_json::json!({
                "type": 2,
                "key": "b",
                "value": "2",
                "timestamp": 4,
                "datacenter_id": 1,
                "dependencies": [
                    {"key": "a", "version": {"timestamp": 3, "datacenter_id": 1}}
                ]
            })
        );
    }

    #[test]
    fn omitted_zero_fields_decode_as_zero() {
        let message: Message =
            serde_json::from_str(r#"{"type":2,"key":"x","value":"1","timestamp":1}"#)
                .expect("decode");
        assert_eq!(
            message,
            Message::Replicated(ReplicatedWrite {
                key: "x".into(),
                value: "1".into(),
                timestamp: 1,
                datacenter_id: 0,
                dependencies: Vec::new(),
            })
        );
    }

    #[test]
    fn client_requests_decode() {
        let write: Message = serde_json::from_str(r#"{"type":0,"key":"x","value":"1"}"#).unwrap();
        assert_eq!(
            write,
            Message::Write {
                key: "x".into(),
                value: "1".into()
            }
        );
        let read: Message = serde_json::from_str(r#"{"type":1,"key":"x"}"#).unwrap();
        assert_eq!(read, Message::Read { key: "x".into() });
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<Message>(r#"{"type":7,"key":"x"}"#).is_err());
    }

    #[test]
    fn missing_response_has_no_value() {
        let json = serde_json::to_value(Response::missing("nope")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": 1, "key": "nope", "status": "err"})
        );
    }

    #[tokio::test]
    async fn reader_splits_concatenated_values() {
        let bytes = br#"{"type":1,"key":"a"}{"type":1,"key":"b"}
{"type":0,"key":"c","value":"3"}"#;
        let mut reader = MessageReader::new(&bytes[..]);

        let first: Message = reader.read_message().await.unwrap().unwrap();
        let second: Message = reader.read_message().await.unwrap().unwrap();
        let third: Message = reader.read_message().await.unwrap().unwrap();
        assert_eq!(first, Message::Read { key: "a".into() });
        assert_eq!(second, Message::Read { key: "b".into() });
        assert_eq!(
            third,
            Message::Write {
                key: "c".into(),
                value: "3".into()
            }
        );
        assert!(reader.read_message::<Message>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_reassembles_value_split_across_writes() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let mut reader = MessageReader::new(reader);

        let task = tokio::spawn(async move {
            writer.write_all(br#"{"type":2,"key":"b","val"#).await.unwrap();
            tokio::task::yield_now().await;
            writer
                .write_all(br#"ue":"2","timestamp":4,"datacenter_id":1,"dependencies":[{"key":"a","version":{"timestamp":3,"datacenter_id":1}}]}"#)
                .await
                .unwrap();
        });

        let message: Message = reader.read_message().await.unwrap().unwrap();
        assert_eq!(message, Message::Replicated(replicated()));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error() {
        let bytes = br#"{"type":1,"#;
        let mut reader = MessageReader::new(&bytes[..]);
        let err = reader.read_message::<Message>().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_value_fails_the_stream() {
        let bytes = format!(r#"{{"type":0,"key":"k","value":"{}"}}"#, "v".repeat(64));
        let mut reader = MessageReader::with_limit(bytes.as_bytes(), 32);
        let err = reader.read_message::<Message>().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn value_split_into_many_small_reads_decodes_once_closed() {
        let (mut writer, reader) = tokio::io::duplex(8);
        let mut reader = MessageReader::new(reader);

        let task = tokio::spawn(async move {
            let encoded = serde_json::to_vec(&Message::Replicated(replicated())).unwrap();
            for piece in encoded.chunks(5) {
                writer.write_all(piece).await.unwrap();
            }
            writer.write_all(br#"{"type":1,"key":"a"}"#).await.unwrap();
        });

        let first: Message = reader.read_message().await.unwrap().unwrap();
        let second: Message = reader.read_message().await.unwrap().unwrap();
        assert_eq!(first, Message::Replicated(replicated()));
        assert_eq!(second, Message::Read { key: "a".into() });
        task.await.unwrap();
        assert!(reader.read_message::<Message>().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_at_end_of_stream_is_invalid_data() {
        let bytes = b"not json";
        let mut reader = MessageReader::new(&bytes[..]);
        let err = reader.read_message::<Message>().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn write_then_read_response() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = MessageReader::new(reader);

        write_message(&mut writer, &Response::found("x", "1")).await.unwrap();
        let parsed: Response = reader.read_message().await.unwrap().unwrap();
        assert_eq!(parsed, Response::found("x", "1"));
        assert!(parsed.is_ok());
    }
}
