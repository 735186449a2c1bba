//! Framed codec for the event wire format.
//!
//! One frame is a JSON header line followed by two exact-length blocks:
//!
//! ```text
//! {"type": ..., "version": ..., "data_length": N, "payload_length": M}\n
//! <N bytes of UTF-8 JSON data><M bytes of raw payload>
//! ```
//!
//! Lengths alone delimit the blocks — there are no separators after the
//! header's newline. The text header keeps small structured messages
//! readable on the wire; the exact-length binary trailer carries arbitrary
//! payloads (raw audio) without any delimiter escaping.
//!
//! Implemented as a [`tokio_util::codec`] `Encoder`/`Decoder`, so it works
//! over any `AsyncRead`/`AsyncWrite` (sockets, pipes, stdio).

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::error::WireError;
use crate::event::Event;
use crate::version::PROTOCOL_VERSION;

/// Upper bound on the header line. A header is a handful of short fields;
/// anything near this size is a corrupt or hostile stream.
pub const DEFAULT_MAX_HEADER_LEN: usize = 1024 * 1024;

/// The newline-terminated JSON header preceding each frame's blocks.
#[derive(Debug, Serialize, Deserialize)]
struct FrameHeader {
    #[serde(rename = "type")]
    event_type: String,

    /// Attached on encode for diagnostics; ignored on decode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,

    /// Byte length of the data block. Zero when `data` is empty or absent.
    #[serde(default)]
    data_length: usize,

    /// Byte length of the payload block. Omitted entirely when there is no
    /// payload — zero-length and absent payloads are distinct on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,

    /// Inline data: a compatibility allowance for short, human-inspectable
    /// fields embedded directly in the header. Merged under the data block,
    /// which wins on key conflicts. Never written by this encoder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
}

/// Encoder/decoder for one [`Event`] per frame.
#[derive(Debug)]
pub struct EventCodec {
    max_header_len: usize,
}

impl EventCodec {
    pub fn new() -> Self {
        Self {
            max_header_len: DEFAULT_MAX_HEADER_LEN,
        }
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Event> for EventCodec {
    type Error = WireError;

    fn encode(&mut self, event: Event, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (event_type, data, payload) = event.into_parts();
        if event_type.is_empty() {
            return Err(WireError::EmptyEventType);
        }

        // An empty data map encodes as zero bytes, never as "{}".
        let data_bytes = match &data {
            Some(map) if !map.is_empty() => {
                serde_json::to_vec(map).map_err(WireError::Serialize)?
            }
            _ => Vec::new(),
        };

        let header = FrameHeader {
            event_type,
            version: Some(PROTOCOL_VERSION.to_string()),
            data_length: data_bytes.len(),
            payload_length: payload.as_ref().map(|p| p.len()),
            data: None,
        };
        let header_bytes = serde_json::to_vec(&header).map_err(WireError::Serialize)?;

        let payload_len = payload.as_ref().map_or(0, |p| p.len());
        dst.reserve(header_bytes.len() + 1 + data_bytes.len() + payload_len);
        dst.extend_from_slice(&header_bytes);
        dst.put_u8(b'\n');
        dst.extend_from_slice(&data_bytes);
        if let Some(payload) = &payload {
            dst.extend_from_slice(payload);
        }
        Ok(())
    }
}

impl Decoder for EventCodec {
    type Item = Event;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > self.max_header_len {
                return Err(WireError::HeaderTooLong {
                    max: self.max_header_len,
                });
            }
            return Ok(None);
        };
        if newline > self.max_header_len {
            return Err(WireError::HeaderTooLong {
                max: self.max_header_len,
            });
        }

        let header: FrameHeader =
            serde_json::from_slice(&src[..newline]).map_err(WireError::MalformedHeader)?;
        if header.event_type.is_empty() {
            return Err(WireError::EmptyEventType);
        }

        // Nothing is consumed until the whole frame is buffered, so a
        // partial frame leaves the decoder restartable.
        let data_length = header.data_length;
        let payload_length = header.payload_length.unwrap_or(0);
        let frame_end = (newline + 1)
            .checked_add(data_length)
            .and_then(|end| end.checked_add(payload_length))
            .ok_or(WireError::FrameLengthOverflow)?;
        if src.len() < frame_end {
            src.reserve(frame_end - src.len());
            return Ok(None);
        }

        src.advance(newline + 1);
        let data_bytes = src.split_to(data_length);
        let payload = header
            .payload_length
            .map(|_| src.split_to(payload_length).freeze());

        let mut data = header.data;
        if data_length > 0 {
            let block: Map<String, Value> =
                serde_json::from_slice(&data_bytes).map_err(WireError::MalformedData)?;
            data = Some(match data {
                // Block keys override inline keys; inline-only keys survive.
                Some(mut inline) => {
                    inline.extend(block);
                    inline
                }
                None => block,
            });
        }

        let mut event = Event::new(header.event_type);
        if let Some(data) = data {
            event = event.with_data(data);
        }
        if let Some(payload) = payload {
            event = event.with_payload(payload);
        }
        Ok(Some(event))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(event) => Ok(Some(event)),
            None if src.is_empty() => Ok(None),
            None if !src.contains(&b'\n') => {
                // An unterminated header line at end of stream reads as a
                // clean end of stream, not an error.
                src.clear();
                Ok(None)
            }
            None => Err(WireError::TruncatedFrame),
        }
    }
}

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of a codec session over any async byte stream.
pub struct EventReader {
    framed: FramedRead<BoxedRead, EventCodec>,
}

impl EventReader {
    pub fn new(read: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            framed: FramedRead::new(Box::new(read) as BoxedRead, EventCodec::new()),
        }
    }

    /// Reader over the process's own standard input.
    pub fn stdin() -> Self {
        Self::new(tokio::io::stdin())
    }

    /// Next decoded event, or `Ok(None)` when the peer closed cleanly.
    pub async fn read_event(&mut self) -> Result<Option<Event>, WireError> {
        self.framed.next().await.transpose()
    }
}

/// Write half of a codec session over any async byte stream.
///
/// Each `write_event` emits one whole frame and waits for the transport's
/// flow control to accept it before returning, so frames from sequential
/// writes never interleave and a slow peer applies backpressure here.
pub struct EventWriter {
    framed: FramedWrite<BoxedWrite, EventCodec>,
}

impl EventWriter {
    pub fn new(write: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            framed: FramedWrite::new(Box::new(write) as BoxedWrite, EventCodec::new()),
        }
    }

    /// Writer over the process's own standard output.
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }

    /// Encode and flush one event.
    pub async fn write_event(&mut self, event: Event) -> Result<(), WireError> {
        self.framed.send(event).await
    }

    /// Flush and shut down the underlying stream. Safe to call twice.
    pub async fn close(&mut self) -> Result<(), WireError> {
        self.framed.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_data() -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("text".to_string(), json!("hello"));
        data.insert("rate".to_string(), json!(16000));
        data
    }

    fn encode(event: Event) -> BytesMut {
        let mut buf = BytesMut::new();
        EventCodec::new().encode(event, &mut buf).unwrap();
        buf
    }

    #[test]
    fn roundtrip_with_data_and_payload() {
        let event = Event::new("audio-chunk")
            .with_data(sample_data())
            .with_payload(b"raw\nbytes\x00\xff".to_vec());

        let mut buf = encode(event.clone());
        let decoded = EventCodec::new().decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, event);
        assert!(buf.is_empty());
    }

    #[test]
    fn header_line_layout_is_exact() {
        let payload = b"payload".to_vec();
        let event = Event::new("audio-chunk")
            .with_data(sample_data())
            .with_payload(payload.clone());
        let buf = encode(event);

        let newline = buf.iter().position(|&b| b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&buf[..newline]).unwrap();
        let data_bytes = serde_json::to_vec(&sample_data()).unwrap();

        assert_eq!(
            header,
            json!({
                "type": "audio-chunk",
                "version": PROTOCOL_VERSION,
                "data_length": data_bytes.len(),
                "payload_length": payload.len(),
            })
        );

        // Lengths alone delimit the blocks: data immediately after the
        // newline, payload immediately after the data, nothing after that.
        let body = &buf[newline + 1..];
        assert_eq!(&body[..data_bytes.len()], &data_bytes[..]);
        assert_eq!(&body[data_bytes.len()..], &payload[..]);
    }

    #[test]
    fn no_payload_omits_payload_length() {
        let event = Event::new("ping").with_data(sample_data());
        let mut buf = encode(event);

        let newline = buf.iter().position(|&b| b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&buf[..newline]).unwrap();
        assert!(header.get("payload_length").is_none());

        let decoded = EventCodec::new().decode(&mut buf).unwrap().unwrap();
        assert!(decoded.payload().is_none());
    }

    #[test]
    fn empty_payload_is_distinct_from_absent() {
        let event = Event::new("audio-stop").with_payload(Vec::<u8>::new());
        let mut buf = encode(event);

        let newline = buf.iter().position(|&b| b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&buf[..newline]).unwrap();
        assert_eq!(header["payload_length"], json!(0));

        let decoded = EventCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload().map(|p| p.len()), Some(0));
    }

    #[test]
    fn empty_data_encodes_as_zero_length() {
        for event in [Event::new("played"), Event::new("played").with_data(Map::new())] {
            let mut buf = encode(event);
            let newline = buf.iter().position(|&b| b == b'\n').unwrap();
            let header: Value = serde_json::from_slice(&buf[..newline]).unwrap();

            assert_eq!(header["data_length"], json!(0));
            assert_eq!(buf.len(), newline + 1);

            let decoded = EventCodec::new().decode(&mut buf).unwrap().unwrap();
            assert!(decoded.data().is_none());
        }
    }

    #[test]
    fn inline_header_data_merges_under_block_data() {
        let block = br#"{"b": 3, "c": 4}"#;
        let header = json!({
            "type": "test-event",
            "data_length": block.len(),
            "data": {"a": 1, "b": 2},
        });
        let mut buf = BytesMut::new();
        buf.extend_from_slice(serde_json::to_string(&header).unwrap().as_bytes());
        buf.put_u8(b'\n');
        buf.extend_from_slice(block);

        let decoded = EventCodec::new().decode(&mut buf).unwrap().unwrap();
        let data = decoded.data().unwrap();
        assert_eq!(data.get("a"), Some(&json!(1)));
        assert_eq!(data.get("b"), Some(&json!(3)));
        assert_eq!(data.get("c"), Some(&json!(4)));
    }

    #[test]
    fn inline_data_alone_survives_zero_length_block() {
        let header = json!({
            "type": "test-event",
            "data_length": 0,
            "data": {"a": 1},
        });
        let mut buf = BytesMut::new();
        buf.extend_from_slice(serde_json::to_string(&header).unwrap().as_bytes());
        buf.put_u8(b'\n');

        let decoded = EventCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.data().unwrap().get("a"), Some(&json!(1)));
    }

    #[test]
    fn partial_frames_decode_once_complete() {
        let event = Event::new("audio-chunk")
            .with_data(sample_data())
            .with_payload(b"0123456789".to_vec());
        let full = encode(event.clone());

        let mut codec = EventCodec::new();
        // Feed byte by byte; only the final byte completes the frame.
        let mut partial = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            partial.put_u8(*byte);
            let result = codec.decode(&mut partial).unwrap();
            if i + 1 < full.len() {
                assert!(result.is_none());
            } else {
                assert_eq!(result.unwrap(), event);
            }
        }
    }

    #[test]
    fn eof_at_frame_boundary_is_clean() {
        let mut codec = EventCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn eof_with_unterminated_header_is_clean() {
        let mut codec = EventCodec::new();
        let mut buf = BytesMut::from(&br#"{"type": "trunc"#[..]);
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn eof_mid_frame_is_truncation() {
        let event = Event::new("audio-chunk").with_payload(b"0123456789".to_vec());
        let full = encode(event);

        let mut codec = EventCodec::new();
        let mut buf = BytesMut::from(&full[..full.len() - 3]);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(WireError::TruncatedFrame)
        ));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let mut codec = EventCodec::new();

        let mut buf = BytesMut::from(&b"not json\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::MalformedHeader(_))
        ));

        let mut buf = BytesMut::from(&br#"{"data_length": 0}"#[..]);
        buf.put_u8(b'\n');
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::MalformedHeader(_))
        ));
    }

    #[test]
    fn empty_event_type_is_rejected_both_ways() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            EventCodec::new().encode(Event::new(""), &mut buf),
            Err(WireError::EmptyEventType)
        ));

        let mut buf = BytesMut::from(&br#"{"type": "", "data_length": 0}"#[..]);
        buf.put_u8(b'\n');
        assert!(matches!(
            EventCodec::new().decode(&mut buf),
            Err(WireError::EmptyEventType)
        ));
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut codec = EventCodec {
            max_header_len: 64,
        };
        let mut buf = BytesMut::from(vec![b'x'; 65].as_slice());
        assert!(matches!(
            codec.decode(&mut buf),
            Err(WireError::HeaderTooLong { max: 64 })
        ));
    }

    #[test]
    fn overflowing_frame_length_is_rejected() {
        let header = format!(
            r#"{{"type": "audio-chunk", "data_length": {max}, "payload_length": {max}}}"#,
            max = usize::MAX
        );
        let mut buf = BytesMut::from(header.as_bytes());
        buf.put_u8(b'\n');
        assert!(matches!(
            EventCodec::new().decode(&mut buf),
            Err(WireError::FrameLengthOverflow)
        ));
    }

    #[tokio::test]
    async fn reader_writer_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let (read, _) = tokio::io::split(client);
        let (_, write) = tokio::io::split(server);

        let mut writer = EventWriter::new(write);
        let mut reader = EventReader::new(read);

        let event = Event::new("ping").with_data(sample_data());
        writer.write_event(event.clone()).await.unwrap();
        assert_eq!(reader.read_event().await.unwrap(), Some(event));

        writer.close().await.unwrap();
        assert_eq!(reader.read_event().await.unwrap(), None);
    }
}
