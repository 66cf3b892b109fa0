// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame and message wire codec.
//!
//! On disk a message is wrapped in a frame:
//!
//! ```text
//! [0x1e][H][0x08 <varint payload_len>][0x1f][payload bytes]
//! ```
//!
//! where `H` counts the header bytes between the length byte and the `0x1f`
//! terminator. Frames are written back to back; `0x1e` doubles as the resync
//! marker, so a reader that lands mid-stream scans forward to the next start
//! byte and validates the header before trusting the length.
//!
//! The payload is a self-delimiting tagged record: each entry is a key byte
//! `(tag << 3) | wiretype` followed by a varint, a fixed 64-bit double, or a
//! length-prefixed blob. Unknown tags are rejected so corruption is caught at
//! the decode step rather than surfacing as a mangled message.

use crate::message::{Field, FieldValue, Message, DEFAULT_SEVERITY, UUID_SIZE};
use thiserror::Error;

/// Frame start / resync marker.
pub const FRAME_START: u8 = 0x1e;
/// Frame header terminator.
pub const FRAME_END: u8 = 0x1f;
/// First header byte: key of the varint payload-length entry.
const HDR_LEN_KEY: u8 = 0x08;
/// Longest varint accepted (64 bits, 7 bits per byte).
const MAX_VARINT_BYTES: usize = 10;
/// Smallest payload that can hold the two required headers
/// (uuid: 2 + 16 bytes, timestamp: 2 bytes).
pub const MIN_MESSAGE_SIZE: usize = 20;

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_LEN: u8 = 2;

// Payload tags.
const TAG_UUID: u32 = 1;
const TAG_TIMESTAMP: u32 = 2;
const TAG_TYPE: u32 = 3;
const TAG_LOGGER: u32 = 4;
const TAG_SEVERITY: u32 = 5;
const TAG_PAYLOAD: u32 = 6;
const TAG_ENV_VERSION: u32 = 7;
const TAG_PID: u32 = 8;
const TAG_HOSTNAME: u32 = 9;
const TAG_FIELD: u32 = 10;

// Field submessage tags.
const FTAG_NAME: u32 = 1;
const FTAG_VALUE_TYPE: u32 = 2;
const FTAG_REPRESENTATION: u32 = 3;
const FTAG_VALUE_STRING: u32 = 4;
const FTAG_VALUE_BYTES: u32 = 5;
const FTAG_VALUE_INTEGER: u32 = 6;
const FTAG_VALUE_DOUBLE: u32 = 7;
const FTAG_VALUE_BOOL: u32 = 8;

/// Structural decode failure.
///
/// The caller treats every variant the same way: skip one byte past the
/// frame marker and keep scanning.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("truncated varint")]
    TruncatedVarint,
    #[error("unknown tag {tag}")]
    UnknownTag { tag: u32 },
    #[error("wiretype {wiretype} invalid for tag {tag}")]
    WireType { tag: u32, wiretype: u8 },
    #[error("length overruns the record")]
    Overrun,
    #[error("uuid must be {UUID_SIZE} bytes, got {0}")]
    UuidSize(usize),
    #[error("missing uuid")]
    MissingUuid,
    #[error("missing timestamp")]
    MissingTimestamp,
    #[error("field record missing a name")]
    UnnamedField,
    #[error("unknown field value type {0}")]
    ValueType(u64),
    #[error("invalid utf-8 in {0}")]
    Utf8(&'static str),
}

/// Result of scanning a buffer window for the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// A complete frame. The payload occupies `payload` within the window;
    /// scanning resumes at `payload.end`.
    Frame {
        start: usize,
        payload: std::ops::Range<usize>,
    },
    /// The first `discard` bytes of the window cannot begin a frame
    /// (no marker, or a marker with an invalid header).
    Garbage { discard: usize },
    /// A frame may begin at `start` but the rest is not buffered yet.
    Partial { start: usize },
}

/// Append `v` to `buf` as a base-128 varint.
pub fn write_varint(buf: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        buf.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    buf.push(v as u8);
}

/// Decode a varint from the front of `buf`, returning `(value, consumed)`.
pub fn read_varint(buf: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut v = 0u64;
    let mut shift = 0u32;
    for (i, b) in buf.iter().enumerate().take(MAX_VARINT_BYTES) {
        v |= u64::from(b & 0x7f) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Ok((v, i + 1));
        }
    }
    Err(DecodeError::TruncatedVarint)
}

/// Wrap an encoded payload in a frame.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut varint = Vec::with_capacity(MAX_VARINT_BYTES);
    write_varint(&mut varint, payload.len() as u64);
    let mut out = Vec::with_capacity(payload.len() + varint.len() + 4);
    out.push(FRAME_START);
    out.push(varint.len() as u8 + 1);
    out.push(HDR_LEN_KEY);
    out.extend_from_slice(&varint);
    out.push(FRAME_END);
    out.extend_from_slice(payload);
    out
}

/// Locate the next frame in `window` (typically `buf[scanpos..readpos]`).
///
/// A marker with a malformed header, a bad terminator, or an out-of-range
/// length is reported as `Garbage` ending one byte past the marker, so the
/// caller naturally resyncs.
pub fn scan_frame(window: &[u8], max_message_size: usize) -> ScanOutcome {
    let Some(start) = window.iter().position(|&b| b == FRAME_START) else {
        return ScanOutcome::Garbage {
            discard: window.len(),
        };
    };
    let rest = &window[start..];
    if rest.len() < 2 {
        return ScanOutcome::Partial { start };
    }
    let hlen = rest[1] as usize;
    // [0x1e][H][H header bytes][0x1f]
    if rest.len() < hlen + 3 {
        return ScanOutcome::Partial { start };
    }
    if rest[hlen + 2] != FRAME_END {
        return ScanOutcome::Garbage { discard: start + 1 };
    }
    let header = &rest[2..2 + hlen];
    if header.first() != Some(&HDR_LEN_KEY) {
        return ScanOutcome::Garbage { discard: start + 1 };
    }
    let Ok((len, consumed)) = read_varint(&header[1..]) else {
        return ScanOutcome::Garbage { discard: start + 1 };
    };
    let len = len as usize;
    if consumed != hlen - 1 || len < MIN_MESSAGE_SIZE || len > max_message_size {
        return ScanOutcome::Garbage { discard: start + 1 };
    }
    let payload_start = start + hlen + 3;
    if window.len() < payload_start + len {
        return ScanOutcome::Partial { start };
    }
    ScanOutcome::Frame {
        start,
        payload: payload_start..payload_start + len,
    }
}

fn write_key(buf: &mut Vec<u8>, tag: u32, wiretype: u8) {
    write_varint(buf, (u64::from(tag) << 3) | u64::from(wiretype));
}

fn write_len_delim(buf: &mut Vec<u8>, tag: u32, bytes: &[u8]) {
    write_key(buf, tag, WIRE_LEN);
    write_varint(buf, bytes.len() as u64);
    buf.extend_from_slice(bytes);
}

fn encode_field(field: &Field) -> Vec<u8> {
    let mut out = Vec::with_capacity(32);
    write_len_delim(&mut out, FTAG_NAME, field.name.as_bytes());
    write_key(&mut out, FTAG_VALUE_TYPE, WIRE_VARINT);
    write_varint(&mut out, field.value.type_id());
    if let Some(rep) = &field.representation {
        write_len_delim(&mut out, FTAG_REPRESENTATION, rep.as_bytes());
    }
    match &field.value {
        FieldValue::String(vs) => {
            for s in vs {
                write_len_delim(&mut out, FTAG_VALUE_STRING, s.as_bytes());
            }
        }
        FieldValue::Bytes(vs) => {
            for b in vs {
                write_len_delim(&mut out, FTAG_VALUE_BYTES, b);
            }
        }
        FieldValue::Integer(vs) => {
            for i in vs {
                write_key(&mut out, FTAG_VALUE_INTEGER, WIRE_VARINT);
                write_varint(&mut out, *i as u64);
            }
        }
        FieldValue::Double(vs) => {
            for d in vs {
                write_key(&mut out, FTAG_VALUE_DOUBLE, WIRE_FIXED64);
                out.extend_from_slice(&d.to_le_bytes());
            }
        }
        FieldValue::Bool(vs) => {
            for b in vs {
                write_key(&mut out, FTAG_VALUE_BOOL, WIRE_VARINT);
                write_varint(&mut out, u64::from(*b));
            }
        }
    }
    out
}

impl FieldValue {
    fn type_id(&self) -> u64 {
        match self {
            FieldValue::String(_) => 0,
            FieldValue::Bytes(_) => 1,
            FieldValue::Integer(_) => 2,
            FieldValue::Double(_) => 3,
            FieldValue::Bool(_) => 4,
        }
    }

    fn empty_for(type_id: u64) -> Result<Self, DecodeError> {
        match type_id {
            0 => Ok(FieldValue::String(Vec::new())),
            1 => Ok(FieldValue::Bytes(Vec::new())),
            2 => Ok(FieldValue::Integer(Vec::new())),
            3 => Ok(FieldValue::Double(Vec::new())),
            4 => Ok(FieldValue::Bool(Vec::new())),
            other => Err(DecodeError::ValueType(other)),
        }
    }
}

/// Encode a message payload (frame not included).
pub fn encode_message(m: &Message) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    write_len_delim(&mut out, TAG_UUID, &m.uuid);
    write_key(&mut out, TAG_TIMESTAMP, WIRE_VARINT);
    write_varint(&mut out, m.timestamp as u64);
    if let Some(t) = &m.msg_type {
        write_len_delim(&mut out, TAG_TYPE, t.as_bytes());
    }
    if let Some(l) = &m.logger {
        write_len_delim(&mut out, TAG_LOGGER, l.as_bytes());
    }
    if m.severity != DEFAULT_SEVERITY {
        write_key(&mut out, TAG_SEVERITY, WIRE_VARINT);
        write_varint(&mut out, m.severity as u64);
    }
    if let Some(p) = &m.payload {
        write_len_delim(&mut out, TAG_PAYLOAD, p.as_bytes());
    }
    if let Some(e) = &m.env_version {
        write_len_delim(&mut out, TAG_ENV_VERSION, e.as_bytes());
    }
    if m.pid != 0 {
        write_key(&mut out, TAG_PID, WIRE_VARINT);
        write_varint(&mut out, m.pid as u64);
    }
    if let Some(h) = &m.hostname {
        write_len_delim(&mut out, TAG_HOSTNAME, h.as_bytes());
    }
    for field in &m.fields {
        write_len_delim(&mut out, TAG_FIELD, &encode_field(field));
    }
    out
}

/// Encode a message and wrap it in a frame in one step.
pub fn frame_message(m: &Message) -> Vec<u8> {
    encode_frame(&encode_message(m))
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let (v, n) = read_varint(&self.buf[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    fn key(&mut self) -> Result<(u32, u8), DecodeError> {
        let k = self.varint()?;
        Ok(((k >> 3) as u32, (k & 7) as u8))
    }

    fn bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.varint()? as usize;
        if self.pos + len > self.buf.len() {
            return Err(DecodeError::Overrun);
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn fixed64(&mut self) -> Result<[u8; 8], DecodeError> {
        if self.pos + 8 > self.buf.len() {
            return Err(DecodeError::Overrun);
        }
        let mut out = [0u8; 8];
        out.copy_from_slice(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(out)
    }
}

fn utf8(bytes: &[u8], what: &'static str) -> Result<String, DecodeError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::Utf8(what))
}

fn expect_wire(tag: u32, wiretype: u8, want: u8) -> Result<(), DecodeError> {
    if wiretype == want {
        Ok(())
    } else {
        Err(DecodeError::WireType { tag, wiretype })
    }
}

fn decode_field(buf: &[u8]) -> Result<Field, DecodeError> {
    let mut cur = Cursor::new(buf);
    let mut name: Option<String> = None;
    let mut representation = None;
    let mut type_id = 0u64;
    // Values are written after the name/type headers, so collect raw entries
    // first and type them once the whole record is read.
    let mut strings: Vec<String> = Vec::new();
    let mut blobs: Vec<Vec<u8>> = Vec::new();
    let mut ints: Vec<u64> = Vec::new();
    let mut doubles: Vec<f64> = Vec::new();

    while !cur.done() {
        let (tag, wiretype) = cur.key()?;
        match tag {
            FTAG_NAME => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                name = Some(utf8(cur.bytes()?, "field name")?);
            }
            FTAG_VALUE_TYPE => {
                expect_wire(tag, wiretype, WIRE_VARINT)?;
                type_id = cur.varint()?;
            }
            FTAG_REPRESENTATION => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                representation = Some(utf8(cur.bytes()?, "field representation")?);
            }
            FTAG_VALUE_STRING => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                strings.push(utf8(cur.bytes()?, "field value")?);
            }
            FTAG_VALUE_BYTES => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                blobs.push(cur.bytes()?.to_vec());
            }
            FTAG_VALUE_INTEGER | FTAG_VALUE_BOOL => {
                expect_wire(tag, wiretype, WIRE_VARINT)?;
                ints.push(cur.varint()?);
            }
            FTAG_VALUE_DOUBLE => {
                expect_wire(tag, wiretype, WIRE_FIXED64)?;
                doubles.push(f64::from_le_bytes(cur.fixed64()?));
            }
            other => return Err(DecodeError::UnknownTag { tag: other }),
        }
    }

    let name = name.ok_or(DecodeError::UnnamedField)?;
    let value = match FieldValue::empty_for(type_id)? {
        FieldValue::String(_) => FieldValue::String(strings),
        FieldValue::Bytes(_) => FieldValue::Bytes(blobs),
        FieldValue::Integer(_) => FieldValue::Integer(ints.into_iter().map(|v| v as i64).collect()),
        FieldValue::Double(_) => FieldValue::Double(doubles),
        FieldValue::Bool(_) => FieldValue::Bool(ints.into_iter().map(|v| v != 0).collect()),
    };
    Ok(Field {
        name,
        value,
        representation,
    })
}

/// Decode a message payload.
///
/// Rejects unknown tags, wiretype mismatches, and records missing the uuid
/// or timestamp.
pub fn decode_message(buf: &[u8]) -> Result<Message, DecodeError> {
    let mut cur = Cursor::new(buf);
    let mut m = Message::default();
    let mut saw_uuid = false;
    let mut saw_timestamp = false;

    while !cur.done() {
        let (tag, wiretype) = cur.key()?;
        match tag {
            TAG_UUID => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                let bytes = cur.bytes()?;
                if bytes.len() != UUID_SIZE {
                    return Err(DecodeError::UuidSize(bytes.len()));
                }
                m.uuid.copy_from_slice(bytes);
                saw_uuid = true;
            }
            TAG_TIMESTAMP => {
                expect_wire(tag, wiretype, WIRE_VARINT)?;
                m.timestamp = cur.varint()? as i64;
                saw_timestamp = true;
            }
            TAG_TYPE => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                m.msg_type = Some(utf8(cur.bytes()?, "type")?);
            }
            TAG_LOGGER => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                m.logger = Some(utf8(cur.bytes()?, "logger")?);
            }
            TAG_SEVERITY => {
                expect_wire(tag, wiretype, WIRE_VARINT)?;
                m.severity = cur.varint()? as i32;
            }
            TAG_PAYLOAD => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                m.payload = Some(utf8(cur.bytes()?, "payload")?);
            }
            TAG_ENV_VERSION => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                m.env_version = Some(utf8(cur.bytes()?, "env_version")?);
            }
            TAG_PID => {
                expect_wire(tag, wiretype, WIRE_VARINT)?;
                m.pid = cur.varint()? as i32;
            }
            TAG_HOSTNAME => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                m.hostname = Some(utf8(cur.bytes()?, "hostname")?);
            }
            TAG_FIELD => {
                expect_wire(tag, wiretype, WIRE_LEN)?;
                m.fields.push(decode_field(cur.bytes()?)?);
            }
            other => return Err(DecodeError::UnknownTag { tag: other }),
        }
    }

    if !saw_uuid {
        return Err(DecodeError::MissingUuid);
    }
    if !saw_timestamp {
        return Err(DecodeError::MissingTimestamp);
    }
    Ok(m)
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
