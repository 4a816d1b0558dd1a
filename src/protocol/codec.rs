// src/protocol/codec.rs

//! CBOR envelope encoding for [`NodeMessage`].
//!
//! Every message travels as a three-entry CBOR map:
//!
//! ```text
//! { "v": 1, "type": "EXECUTE", "body": <variant payload> }
//! ```
//!
//! The body is decoded only after the type tag has been recognised, so an
//! unknown message type is reported as such instead of as a body error.
//! Unknown envelope keys are skipped.

use minicbor::{Decoder, Encoder};

use super::{MessageType, NodeMessage, ProtocolError};

pub const PROTOCOL_VERSION_V1: u32 = 1;

/// Encode a message into a standalone envelope.
pub fn encode_message(message: &NodeMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    let mut enc = Encoder::new(&mut buf);
    enc.map(3)?;
    enc.str("v")?;
    enc.u32(PROTOCOL_VERSION_V1)?;
    enc.str("type")?;
    enc.str(message.message_type().as_str())?;
    enc.str("body")?;
    match message {
        NodeMessage::Ready(m) => enc.encode(m)?,
        NodeMessage::Init(m) => enc.encode(m)?,
        NodeMessage::Execute(m) => enc.encode(m)?,
        NodeMessage::Cancel(m) => enc.encode(m)?,
        NodeMessage::IsAlive(m) => enc.encode(m)?,
        NodeMessage::Scaling(m) => enc.encode(m)?,
        NodeMessage::Invocations(m) => enc.encode(m)?,
        NodeMessage::Result(m) => enc.encode(m)?,
        NodeMessage::Failure(m) => enc.encode(m)?,
    };
    Ok(buf)
}

/// Decode one envelope. The whole slice must be consumed.
pub fn decode_message(bytes: &[u8]) -> Result<NodeMessage, ProtocolError> {
    let parts = decode_envelope_parts(bytes)?;

    if parts.version != PROTOCOL_VERSION_V1 {
        return Err(ProtocolError::UnsupportedVersion {
            expected: PROTOCOL_VERSION_V1,
            got: parts.version,
        });
    }

    let message_type = MessageType::parse(parts.message_type)
        .ok_or_else(|| ProtocolError::UnknownMessageType(parts.message_type.to_string()))?;

    decode_body(message_type, parts.body)
}

struct EnvelopeParts<'a> {
    version: u32,
    message_type: &'a str,
    body: &'a [u8],
}

fn decode_envelope_parts(bytes: &[u8]) -> Result<EnvelopeParts<'_>, ProtocolError> {
    let mut dec = Decoder::new(bytes);
    let len = dec.map()?.ok_or(ProtocolError::IndefiniteLength)?;

    let mut version = None;
    let mut message_type = None;
    let mut body = None;

    for _ in 0..len {
        match dec.str()? {
            "v" => version = Some(dec.u32()?),
            "type" => message_type = Some(dec.str()?),
            "body" => {
                let start = dec.position();
                dec.skip()?;
                body = Some(&bytes[start..dec.position()]);
            }
            _ => dec.skip()?,
        }
    }

    if dec.position() != bytes.len() {
        return Err(ProtocolError::TrailingBytes);
    }

    Ok(EnvelopeParts {
        version: version.ok_or(ProtocolError::MissingField("v"))?,
        message_type: message_type.ok_or(ProtocolError::MissingField("type"))?,
        body: body.ok_or(ProtocolError::MissingField("body"))?,
    })
}

fn decode_body(message_type: MessageType, body: &[u8]) -> Result<NodeMessage, ProtocolError> {
    let mut dec = Decoder::new(body);
    let message = match message_type {
        MessageType::Ready => NodeMessage::Ready(dec.decode()?),
        MessageType::Init => NodeMessage::Init(dec.decode()?),
        MessageType::Execute => {
            let execute: super::Execute = dec.decode()?;
            execute
                .job
                .validate()
                .map_err(|e| ProtocolError::InvalidField {
                    field: "job",
                    reason: e.to_string(),
                })?;
            NodeMessage::Execute(execute)
        }
        MessageType::Cancel => {
            let cancel: super::Cancel = dec.decode()?;
            // Re-run the constructor check on what came off the wire.
            NodeMessage::Cancel(super::Cancel::new(cancel.jobs)?)
        }
        MessageType::IsAlive => NodeMessage::IsAlive(dec.decode()?),
        MessageType::Scaling => NodeMessage::Scaling(dec.decode()?),
        MessageType::Invocations => NodeMessage::Invocations(dec.decode()?),
        MessageType::Result => NodeMessage::Result(dec.decode()?),
        MessageType::Failure => NodeMessage::Failure(dec.decode()?),
    };
    Ok(message)
}
