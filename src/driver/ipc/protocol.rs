//! Length-prefixed wire protocol between `IpcDriver` and `IpcWorker`
//!
//! Frame layout (little-endian):
//!
//! ```text
//! +------+----------------+-----------------+
//! | type | payload length | payload         |
//! | u8   | u32            | length bytes    |
//! +------+----------------+-----------------+
//! ```
//!
//! Requests use types 1-5. The worker answers every request with exactly
//! one `RESPONSE` or `ERROR` frame.

use std::io::{self, Read, Write};
use std::time::Duration;

use bytes::{Buf, BufMut};

use crate::error::{FtsError, Result};
use crate::query::ScoredDoc;

use super::super::{IndexStats, SearchResponse};

pub const MSG_ADD_DOCUMENT: u8 = 1;
pub const MSG_BUILD: u8 = 2;
pub const MSG_SEARCH: u8 = 3;
pub const MSG_STATS: u8 = 4;
pub const MSG_CLOSE: u8 = 5;
pub const MSG_RESPONSE: u8 = 128;
pub const MSG_ERROR: u8 = 129;

pub const FRAME_HEADER_BYTES: usize = 5;
/// Largest accepted payload
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;
pub const STATS_RESPONSE_BYTES: usize = 16;

/// One decoded frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: u8, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn response(payload: Vec<u8>) -> Self {
        Self::new(MSG_RESPONSE, payload)
    }

    pub fn error(message: &str) -> Self {
        Self::new(MSG_ERROR, message.as_bytes().to_vec())
    }
}

/// Write one frame and flush the stream
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<()> {
    if frame.payload.len() > MAX_FRAME_BYTES {
        return Err(FtsError::Protocol(format!(
            "payload of {} bytes exceeds the {} byte limit",
            frame.payload.len(),
            MAX_FRAME_BYTES
        )));
    }
    let mut header = [0u8; FRAME_HEADER_BYTES];
    header[0] = frame.kind;
    header[1..].copy_from_slice(&(frame.payload.len() as u32).to_le_bytes());
    writer.write_all(&header)?;
    writer.write_all(&frame.payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame
///
/// Returns `None` when the peer closed the stream cleanly between frames.
/// A stream ending inside a frame is an error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>> {
    let mut header = [0u8; FRAME_HEADER_BYTES];
    let mut filled = 0;
    while filled < FRAME_HEADER_BYTES {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(truncated("frame header")),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let kind = header[0];
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(FtsError::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_BYTES
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            truncated("frame payload")
        } else {
            e.into()
        }
    })?;
    Ok(Some(Frame { kind, payload }))
}

fn truncated(what: &str) -> FtsError {
    FtsError::Protocol(format!("connection closed inside {}", what))
}

/// A decoded client request
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    AddDocument { id: String, text: String },
    Build,
    Search { limit: u32, query: String },
    Stats,
    Close,
}

impl Request {
    pub fn encode(&self) -> Frame {
        match self {
            Request::AddDocument { id, text } => {
                let mut payload = Vec::with_capacity(4 + id.len() + text.len());
                payload.put_u32_le(id.len() as u32);
                payload.put_slice(id.as_bytes());
                payload.put_slice(text.as_bytes());
                Frame::new(MSG_ADD_DOCUMENT, payload)
            }
            Request::Build => Frame::new(MSG_BUILD, Vec::new()),
            Request::Search { limit, query } => {
                let mut payload = Vec::with_capacity(4 + query.len());
                payload.put_u32_le(*limit);
                payload.put_slice(query.as_bytes());
                Frame::new(MSG_SEARCH, payload)
            }
            Request::Stats => Frame::new(MSG_STATS, Vec::new()),
            Request::Close => Frame::new(MSG_CLOSE, Vec::new()),
        }
    }

    pub fn decode(frame: &Frame) -> Result<Self> {
        let mut buf = frame.payload.as_slice();
        match frame.kind {
            MSG_ADD_DOCUMENT => {
                let id_len = take_u32(&mut buf, "document id length")? as usize;
                if buf.remaining() < id_len {
                    return Err(FtsError::Protocol(format!(
                        "document id of {} bytes overruns a {} byte payload",
                        id_len,
                        frame.payload.len()
                    )));
                }
                let id = utf8(&buf[..id_len], "document id")?;
                let text = utf8(&buf[id_len..], "document text")?;
                Ok(Request::AddDocument { id, text })
            }
            MSG_BUILD => Ok(Request::Build),
            MSG_SEARCH => {
                let limit = take_u32(&mut buf, "search limit")?;
                let query = utf8(buf, "query")?;
                Ok(Request::Search { limit, query })
            }
            MSG_STATS => Ok(Request::Stats),
            MSG_CLOSE => Ok(Request::Close),
            other => Err(FtsError::Protocol(format!("unknown message type {}", other))),
        }
    }
}

fn take_u32(buf: &mut &[u8], what: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(FtsError::Protocol(format!("payload too short for {}", what)));
    }
    Ok(buf.get_u32_le())
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| FtsError::Protocol(format!("{} is not valid UTF-8", what)))
}

pub fn encode_stats(stats: &IndexStats) -> Vec<u8> {
    let mut out = Vec::with_capacity(STATS_RESPONSE_BYTES);
    out.put_u32_le(stats.doc_count);
    out.put_u32_le(stats.term_count);
    out.put_u64_le(stats.memory_bytes);
    out
}

pub fn decode_stats(payload: &[u8]) -> Result<IndexStats> {
    if payload.len() != STATS_RESPONSE_BYTES {
        return Err(FtsError::Protocol(format!(
            "stats response has {} bytes, expected {}",
            payload.len(),
            STATS_RESPONSE_BYTES
        )));
    }
    let mut buf = payload;
    Ok(IndexStats {
        doc_count: buf.get_u32_le(),
        term_count: buf.get_u32_le(),
        memory_bytes: buf.get_u64_le(),
    })
}

/// Search response: count, total, duration in ns, then one record per hit
/// (score f32, doc id u32, key length u16, key bytes)
pub fn encode_search_response(response: &SearchResponse) -> Vec<u8> {
    let keys: usize = response.hits.iter().map(|h| h.key.len()).sum();
    let mut out = Vec::with_capacity(20 + response.hits.len() * 10 + keys);
    out.put_u32_le(response.hits.len() as u32);
    out.put_u64_le(response.total);
    out.put_u64_le(u64::try_from(response.duration.as_nanos()).unwrap_or(u64::MAX));
    for hit in &response.hits {
        let key = &hit.key.as_bytes()[..key_prefix_len(&hit.key)];
        out.put_f32_le(hit.score);
        out.put_u32_le(hit.doc_id);
        out.put_u16_le(key.len() as u16);
        out.put_slice(key);
    }
    out
}

/// Longest prefix of `key` that fits a u16 length without splitting a char
fn key_prefix_len(key: &str) -> usize {
    let mut end = key.len().min(u16::MAX as usize);
    while !key.is_char_boundary(end) {
        end -= 1;
    }
    end
}

pub fn decode_search_response(payload: &[u8]) -> Result<SearchResponse> {
    let short = || FtsError::Protocol("search response truncated".into());
    let mut buf = payload;
    if buf.remaining() < 20 {
        return Err(short());
    }
    let count = buf.get_u32_le() as usize;
    let total = buf.get_u64_le();
    let duration = Duration::from_nanos(buf.get_u64_le());

    let mut hits = Vec::with_capacity(count.min(buf.remaining() / 10));
    for _ in 0..count {
        if buf.remaining() < 10 {
            return Err(short());
        }
        let score = buf.get_f32_le();
        let doc_id = buf.get_u32_le();
        let key_len = buf.get_u16_le() as usize;
        if buf.remaining() < key_len {
            return Err(short());
        }
        let key = utf8(&buf[..key_len], "document id")?;
        buf.advance(key_len);
        hits.push(ScoredDoc { doc_id, key, score });
    }
    if buf.has_remaining() {
        return Err(FtsError::Protocol(format!(
            "{} trailing bytes after search response",
            buf.remaining()
        )));
    }
    Ok(SearchResponse {
        hits,
        total,
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_frame_layout() {
        let mut out = Vec::new();
        let frame = Request::Search {
            limit: 10,
            query: "cat".into(),
        }
        .encode();
        write_frame(&mut out, &frame).unwrap();
        assert_eq!(out, vec![3, 7, 0, 0, 0, 10, 0, 0, 0, b'c', b'a', b't']);

        let read = read_frame(&mut Cursor::new(out)).unwrap().unwrap();
        assert_eq!(
            Request::decode(&read).unwrap(),
            Request::Search {
                limit: 10,
                query: "cat".into()
            }
        );
    }

    #[test]
    fn test_add_document_payload() {
        let frame = Request::AddDocument {
            id: "doc-7".into(),
            text: "hello world".into(),
        }
        .encode();
        assert_eq!(&frame.payload[..4], &5u32.to_le_bytes());
        assert_eq!(&frame.payload[4..9], b"doc-7");
        assert_eq!(&frame.payload[9..], b"hello world");

        let bad = Frame::new(MSG_ADD_DOCUMENT, vec![9, 0, 0, 0, b'x']);
        assert!(matches!(Request::decode(&bad), Err(FtsError::Protocol(_))));
    }

    #[test]
    fn test_stats_payload_is_sixteen_bytes() {
        let stats = IndexStats {
            doc_count: 3,
            term_count: 7,
            memory_bytes: 1 << 40,
        };
        let payload = encode_stats(&stats);
        assert_eq!(payload.len(), 16);
        assert_eq!(&payload[..4], &3u32.to_le_bytes());
        assert_eq!(decode_stats(&payload).unwrap(), stats);
        assert!(decode_stats(&payload[..15]).is_err());
    }

    #[test]
    fn test_search_response_decode() {
        let response = SearchResponse {
            hits: vec![
                ScoredDoc {
                    doc_id: 4,
                    key: "a".into(),
                    score: 1.5,
                },
                ScoredDoc {
                    doc_id: 9,
                    key: "bb".into(),
                    score: 0.25,
                },
            ],
            total: 12,
            duration: Duration::from_micros(40),
        };
        let payload = encode_search_response(&response);
        assert_eq!(decode_search_response(&payload).unwrap(), response);
        assert!(decode_search_response(&payload[..payload.len() - 1]).is_err());
    }

    #[test]
    fn test_long_key_cut_on_char_boundary() {
        // 'é' is two bytes, so byte 65_535 falls inside a char
        let key = "é".repeat(40_000);
        let response = SearchResponse {
            hits: vec![ScoredDoc {
                doc_id: 1,
                key: key.clone(),
                score: 2.0,
            }],
            total: 1,
            duration: Duration::ZERO,
        };
        let decoded = decode_search_response(&encode_search_response(&response)).unwrap();
        let got = &decoded.hits[0].key;
        assert_eq!(got.len(), 65_534);
        assert!(key.starts_with(got.as_str()));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = Frame::new(42, Vec::new());
        let err = Request::decode(&frame).unwrap_err();
        assert_eq!(err.to_string(), "Protocol error: unknown message type 42");
    }

    #[test]
    fn test_truncated_frames() {
        // Clean end of stream
        assert_eq!(read_frame(&mut Cursor::new(Vec::<u8>::new())).unwrap(), None);
        // Header cut short
        assert!(read_frame(&mut Cursor::new(vec![1, 4, 0])).is_err());
        // Payload cut short
        assert!(read_frame(&mut Cursor::new(vec![1, 4, 0, 0, 0, 1, 2])).is_err());
        // Oversized frame
        let mut oversized = vec![MSG_SEARCH];
        oversized.extend_from_slice(&((MAX_FRAME_BYTES as u32) + 1).to_le_bytes());
        assert!(matches!(
            read_frame(&mut Cursor::new(oversized)),
            Err(FtsError::Protocol(_))
        ));
    }
}
