//! Wire codec: frame encoding/decoding for the connect binary protocol.
//!
//! Pure and side-effect-free (spec.md §4.1): nothing here touches a
//! socket. Decoding a short buffer returns [`DecodeError::Incomplete`]
//! rather than panicking or reading past what's available, so callers
//! can always feed partial TCP segments straight in.

use byteorder::{ByteOrder, LittleEndian};
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Sentinel command id for the manifest-fetch request/response.
pub const MANIFEST_COMMAND_ID: i32 = -1;

/// The six scalar wire types a manifest entry can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum WireType {
    Boolean = 0,
    Integer = 1,
    Float = 2,
    Double = 3,
    String = 4,
    Long = 5,
}

/// A decoded scalar value, in the shape callbacks and `data` events carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Float(f32),
    Double(f64),
    String(String),
    Long(i64),
}

impl Value {
    /// The wire type this value was decoded as / would encode as.
    pub fn wire_type(&self) -> WireType {
        match self {
            Value::Boolean(_) => WireType::Boolean,
            Value::Integer(_) => WireType::Integer,
            Value::Float(_) => WireType::Float,
            Value::Double(_) => WireType::Double,
            Value::String(_) => WireType::String,
            Value::Long(_) => WireType::Long,
        }
    }
}

/// A codec-level failure: either the buffer didn't hold enough bytes yet
/// (not an error, just "come back later") or the bytes present are
/// malformed for the declared type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("need more bytes")]
    Incomplete,
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// The 8-byte header every response frame begins with.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub command_id: i32,
    pub payload_length: i32,
}

impl FrameHeader {
    /// Total length of the frame this header describes, header included.
    pub fn frame_len(&self) -> usize {
        8 + self.payload_length.max(0) as usize
    }
}

/// Read the 8-byte header from the front of `buf`, if present.
pub fn peek_header(buf: &[u8]) -> Result<FrameHeader, DecodeError> {
    if buf.len() < 8 {
        return Err(DecodeError::Incomplete);
    }
    let command_id = LittleEndian::read_i32(&buf[0..4]);
    let payload_length = LittleEndian::read_i32(&buf[4..8]);
    if payload_length < 0 {
        return Err(DecodeError::Malformed(format!(
            "negative payload length {payload_length}"
        )));
    }
    Ok(FrameHeader {
        command_id,
        payload_length,
    })
}

/// Whether `buf` holds a complete frame described by `header`.
pub fn is_complete(buf: &[u8], header: &FrameHeader) -> bool {
    buf.len() >= header.frame_len()
}

/// Decode a scalar payload per the §4.1 payload-layout table. `payload`
/// must be exactly `header.payload_length` bytes (the slice between the
/// 8-byte header and the next frame).
pub fn decode_payload(wire_type: WireType, payload: &[u8]) -> Result<Value, DecodeError> {
    match wire_type {
        WireType::Boolean => {
            let b = *payload.first().ok_or(DecodeError::Incomplete)?;
            Ok(Value::Boolean(b != 0))
        }
        WireType::Integer => {
            if payload.len() < 4 {
                return Err(DecodeError::Incomplete);
            }
            Ok(Value::Integer(LittleEndian::read_i32(&payload[0..4])))
        }
        WireType::Float => {
            if payload.len() < 4 {
                return Err(DecodeError::Incomplete);
            }
            Ok(Value::Float(LittleEndian::read_f32(&payload[0..4])))
        }
        WireType::Double => {
            if payload.len() < 8 {
                return Err(DecodeError::Incomplete);
            }
            Ok(Value::Double(LittleEndian::read_f64(&payload[0..8])))
        }
        WireType::Long => {
            if payload.len() < 8 {
                return Err(DecodeError::Incomplete);
            }
            Ok(Value::Long(LittleEndian::read_i64(&payload[0..8])))
        }
        WireType::String => decode_string(payload).map(Value::String),
    }
}

/// Decode a `[i32 length][length bytes UTF-8]` string, used both for
/// scalar String payloads and the manifest response's text body.
pub fn decode_string(buf: &[u8]) -> Result<String, DecodeError> {
    if buf.len() < 4 {
        return Err(DecodeError::Incomplete);
    }
    let len = LittleEndian::read_i32(&buf[0..4]);
    if len < 0 {
        return Err(DecodeError::Malformed(format!("negative string length {len}")));
    }
    let len = len as usize;
    let body = buf.get(4..4 + len).ok_or(DecodeError::Incomplete)?;
    String::from_utf8(body.to_vec())
        .map_err(|e| DecodeError::Malformed(format!("invalid UTF-8: {e}")))
}

/// `[i32 command_id][u8 flag=0]` — a one-shot read, or (with
/// `command_id = MANIFEST_COMMAND_ID`) the manifest-fetch request.
pub fn encode_read_request(command_id: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    let mut hdr = [0u8; 4];
    LittleEndian::write_i32(&mut hdr, command_id);
    buf.extend_from_slice(&hdr);
    buf.push(0);
    buf
}

/// Manifest-fetch request: identical shape to a read request for the
/// `-1` sentinel id.
pub fn encode_manifest_request() -> Vec<u8> {
    encode_read_request(MANIFEST_COMMAND_ID)
}

fn append_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Boolean(b) => buf.push(if *b { 1 } else { 0 }),
        Value::Integer(i) => {
            let mut tmp = [0u8; 4];
            LittleEndian::write_i32(&mut tmp, *i);
            buf.extend_from_slice(&tmp);
        }
        Value::Float(f) => {
            let mut tmp = [0u8; 4];
            LittleEndian::write_f32(&mut tmp, *f);
            buf.extend_from_slice(&tmp);
        }
        Value::Double(d) => {
            let mut tmp = [0u8; 8];
            LittleEndian::write_f64(&mut tmp, *d);
            buf.extend_from_slice(&tmp);
        }
        Value::Long(l) => {
            let mut tmp = [0u8; 8];
            LittleEndian::write_i64(&mut tmp, *l);
            buf.extend_from_slice(&tmp);
        }
        Value::String(s) => {
            let mut tmp = [0u8; 4];
            LittleEndian::write_i32(&mut tmp, s.len() as i32);
            buf.extend_from_slice(&tmp);
            buf.extend_from_slice(s.as_bytes());
        }
    }
}

/// `[i32 command_id][u8 flag=1][value encoded per type]`.
pub fn encode_write_request(command_id: i32, value: &Value) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9);
    let mut hdr = [0u8; 4];
    LittleEndian::write_i32(&mut hdr, command_id);
    buf.extend_from_slice(&hdr);
    buf.push(1);
    append_value(&mut buf, value);
    buf
}

/// `[i32 command_id][u8 flag=1][i32 n_args]` then, per arg,
/// `[i32 name_len][name bytes][i32 value_len][value bytes]`.
pub fn encode_invoke_request(command_id: i32, args: &[(String, String)]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(9 + args.len() * 16);
    let mut hdr = [0u8; 4];
    LittleEndian::write_i32(&mut hdr, command_id);
    buf.extend_from_slice(&hdr);
    buf.push(1);
    let mut n = [0u8; 4];
    LittleEndian::write_i32(&mut n, args.len() as i32);
    buf.extend_from_slice(&n);
    for (name, value) in args {
        let mut len = [0u8; 4];
        LittleEndian::write_i32(&mut len, name.len() as i32);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(name.as_bytes());
        LittleEndian::write_i32(&mut len, value.len() as i32);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(value.as_bytes());
    }
    buf
}
