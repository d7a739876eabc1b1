//! Envelope codec: shape classification and serialization.
//!
//! The codec performs no business validation; secret and handler checks are
//! the receiving peer's job. It classifies raw objects by their
//! discriminating fields and rejects anything that fits neither the response
//! shape nor the named-request shape.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::protocol::{Body, Control, Envelope, PRINT_CHANNEL, RESET_CHANNEL};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Payload cannot be represented in the wire format. Detected before any
    /// envelope is built, so a send either fails whole or transmits whole.
    #[error("payload is not representable as JSON: {0}")]
    Unrepresentable(#[from] serde_json::Error),
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("message has a missing or non-string secret")]
    MissingSecret,
    #[error("message carries neither a name nor a responseID")]
    MissingDiscriminator,
    #[error("named message {name:?} has no id")]
    MissingId { name: String },
    #[error("message field {0:?} has the wrong type")]
    InvalidField(&'static str),
}

/// Convert an arbitrary payload into its wire representation, failing before
/// any envelope is constructed if it is not representable.
pub fn to_payload<T: Serialize>(data: &T) -> Result<Value, EncodeError> {
    Ok(serde_json::to_value(data)?)
}

/// Serialize an envelope to its raw wire object.
///
/// Total over well-formed envelopes; a `Null` payload is omitted on the wire
/// and restored on decode, so `decode(encode(e)) == e`.
pub fn encode(envelope: &Envelope) -> Value {
    let mut map = Map::new();
    map.insert("secret".to_string(), Value::String(envelope.secret.clone()));

    match &envelope.body {
        Body::Request { name, id, data } => {
            map.insert("name".to_string(), Value::String(name.clone()));
            map.insert("id".to_string(), Value::from(*id));
            insert_data(&mut map, data);
        }
        Body::Response { response_id, data } => {
            map.insert("responseID".to_string(), Value::from(*response_id));
            insert_data(&mut map, data);
        }
        Body::Control(Control::Print { data }) => {
            map.insert("name".to_string(), Value::String(PRINT_CHANNEL.to_string()));
            insert_data(&mut map, data);
        }
        Body::Control(Control::Reset) => {
            map.insert("name".to_string(), Value::String(RESET_CHANNEL.to_string()));
        }
    }

    Value::Object(map)
}

fn insert_data(map: &mut Map<String, Value>, data: &Value) {
    if !data.is_null() {
        map.insert("data".to_string(), data.clone());
    }
}

/// Classify a raw wire object into an envelope.
///
/// Classification is by field presence, in dispatch order: `responseID`
/// first (it wins if both discriminators are present), then fire-only
/// control channels, then named requests, which must carry an integer `id`.
pub fn decode(raw: Value) -> Result<Envelope, DecodeError> {
    let Value::Object(mut map) = raw else {
        return Err(DecodeError::NotAnObject);
    };

    let secret = match map.remove("secret") {
        Some(Value::String(secret)) => secret,
        _ => return Err(DecodeError::MissingSecret),
    };

    let data = map.remove("data").unwrap_or(Value::Null);

    if let Some(raw_id) = map.remove("responseID") {
        let response_id = raw_id
            .as_u64()
            .ok_or(DecodeError::InvalidField("responseID"))?;
        return Ok(Envelope {
            secret,
            body: Body::Response { response_id, data },
        });
    }

    let name = match map.remove("name") {
        Some(Value::String(name)) => name,
        Some(_) => return Err(DecodeError::InvalidField("name")),
        None => return Err(DecodeError::MissingDiscriminator),
    };

    if name == PRINT_CHANNEL {
        return Ok(Envelope {
            secret,
            body: Body::Control(Control::Print { data }),
        });
    }
    if name == RESET_CHANNEL {
        return Ok(Envelope {
            secret,
            body: Body::Control(Control::Reset),
        });
    }

    match map.remove("id") {
        Some(raw_id) => {
            let id = raw_id.as_u64().ok_or(DecodeError::InvalidField("id"))?;
            Ok(Envelope {
                secret,
                body: Body::Request { name, id, data },
            })
        }
        None => Err(DecodeError::MissingId { name }),
    }
}
