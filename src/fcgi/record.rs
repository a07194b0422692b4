//! FastCGI 1.0 record codec.
//!
//! Every record is an 8-byte header followed by up to 65535 bytes of
//! content and up to 255 bytes of padding:
//!
//! ```text
//! version:u8 type:u8 request_id:u16be content_length:u16be padding:u8 reserved:u8
//! ```

use bytes::{BufMut, BytesMut};

pub const VERSION_1: u8 = 1;
pub const HEADER_LEN: usize = 8;
pub const MAX_CONTENT_LEN: usize = 65_535;

/// Role requested in `FCGI_BEGIN_REQUEST`.
pub const ROLE_RESPONDER: u16 = 1;

/// `protocolStatus` value for a completed request.
pub const REQUEST_COMPLETE: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    BeginRequest,
    AbortRequest,
    EndRequest,
    Params,
    Stdin,
    Stdout,
    Stderr,
    Data,
    GetValues,
    GetValuesResult,
    UnknownType,
    Other(u8),
}

impl From<u8> for RecordType {
    fn from(value: u8) -> Self {
        match value {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            11 => RecordType::UnknownType,
            other => RecordType::Other(other),
        }
    }
}

impl From<RecordType> for u8 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::BeginRequest => 1,
            RecordType::AbortRequest => 2,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Stderr => 7,
            RecordType::Data => 8,
            RecordType::GetValues => 9,
            RecordType::GetValuesResult => 10,
            RecordType::UnknownType => 11,
            RecordType::Other(other) => other,
        }
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub record_type: RecordType,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Self {
        Self {
            version: raw[0],
            record_type: RecordType::from(raw[1]),
            request_id: u16::from_be_bytes([raw[2], raw[3]]),
            content_length: u16::from_be_bytes([raw[4], raw[5]]),
            padding_length: raw[6],
        }
    }
}

/// Append one record, padding the content to a multiple of 8 bytes.
fn put_record(buf: &mut BytesMut, record_type: RecordType, request_id: u16, content: &[u8]) {
    debug_assert!(content.len() <= MAX_CONTENT_LEN);
    let padding = (8 - content.len() % 8) % 8;
    buf.put_u8(VERSION_1);
    buf.put_u8(record_type.into());
    buf.put_u16(request_id);
    buf.put_u16(content.len() as u16);
    buf.put_u8(padding as u8);
    buf.put_u8(0);
    buf.put_slice(content);
    buf.put_bytes(0, padding);
}

/// Append a stream (PARAMS, STDIN, ...) split into records, followed by
/// the empty record that terminates it.
pub fn put_stream(buf: &mut BytesMut, record_type: RecordType, request_id: u16, content: &[u8]) {
    for chunk in content.chunks(MAX_CONTENT_LEN) {
        put_record(buf, record_type, request_id, chunk);
    }
    put_record(buf, record_type, request_id, &[]);
}

/// Append `FCGI_BEGIN_REQUEST` for the responder role, connection closed
/// by the application once the request ends.
pub fn put_begin_request(buf: &mut BytesMut, request_id: u16) {
    let mut body = [0u8; 8];
    body[..2].copy_from_slice(&ROLE_RESPONDER.to_be_bytes());
    put_record(buf, RecordType::BeginRequest, request_id, &body);
}

fn put_length(buf: &mut BytesMut, len: usize) {
    if len < 128 {
        buf.put_u8(len as u8);
    } else {
        buf.put_u32(len as u32 | 0x8000_0000);
    }
}

/// Encode name-value pairs for a PARAMS stream.
pub fn encode_params<'a, I>(pairs: I) -> BytesMut
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut buf = BytesMut::new();
    for (name, value) in pairs {
        put_length(&mut buf, name.len());
        put_length(&mut buf, value.len());
        buf.put_slice(name.as_bytes());
        buf.put_slice(value.as_bytes());
    }
    buf
}

/// Decoded `FCGI_END_REQUEST` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndRequest {
    pub app_status: u32,
    pub protocol_status: u8,
}

impl EndRequest {
    pub fn parse(content: &[u8]) -> Option<Self> {
        if content.len() < 8 {
            return None;
        }
        Some(Self {
            app_status: u32::from_be_bytes([content[0], content[1], content[2], content[3]]),
            protocol_status: content[4],
        })
    }
}
