//! # JSON <-> Protobuf Codec
//!
//! Transcodes `serde_json::Value` payloads to Protobuf bytes and back using
//! `prost_reflect::DynamicMessage` and the canonical protobuf-JSON mapping, so requests and
//! responses never need generated Rust structs.
//!
//! 1. **Encode (JSON -> Proto)**: the value is deserialized into a `DynamicMessage` of the
//!    input type, which validates field names and types, and then encoded to wire bytes.
//! 2. **Decode (Proto -> JSON)**: wire bytes are decoded into a `DynamicMessage` of the output
//!    type and serialized back into a JSON value. Unpopulated fields are emitted with their
//!    defaults and 64-bit integers are rendered as strings.
use bytes::Bytes;
use prost::Message;
use prost_reflect::{DeserializeOptions, DynamicMessage, MessageDescriptor, SerializeOptions};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON structure does not match Protobuf schema of '{message}': '{source}'")]
    Encode {
        message: String,
        source: serde_json::Error,
    },
    #[error("Failed to decode Protobuf bytes as '{message}': '{source}'")]
    Decode {
        message: String,
        source: prost::DecodeError,
    },
    #[error("Failed to map '{message}' to JSON: '{source}'")]
    Serialize {
        message: String,
        source: serde_json::Error,
    },
}

/// What the encoder does with JSON keys the message type doesn't declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnknownFields {
    /// Fail the encode with [`CodecError::Encode`].
    #[default]
    Reject,
    /// Drop them silently.
    Ignore,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicCodec {
    unknown_fields: UnknownFields,
}

impl DynamicCodec {
    pub fn new(unknown_fields: UnknownFields) -> Self {
        Self { unknown_fields }
    }

    pub fn unknown_fields(&self) -> UnknownFields {
        self.unknown_fields
    }

    /// Encodes `value` as a message of type `desc`.
    ///
    /// Both JSON (lowerCamelCase) and original proto field names are accepted, as are 64-bit
    /// integers given either as numbers or as strings.
    pub fn encode(&self, value: Value, desc: &MessageDescriptor) -> Result<Bytes, CodecError> {
        let options = DeserializeOptions::new()
            .deny_unknown_fields(self.unknown_fields == UnknownFields::Reject);

        let message = DynamicMessage::deserialize_with_options(desc.clone(), value, &options)
            .map_err(|source| CodecError::Encode {
                message: desc.full_name().to_string(),
                source,
            })?;

        Ok(Bytes::from(message.encode_to_vec()))
    }

    /// Decodes `bytes` as a message of type `desc` into its JSON representation.
    pub fn decode(&self, bytes: Bytes, desc: &MessageDescriptor) -> Result<Value, CodecError> {
        let message =
            DynamicMessage::decode(desc.clone(), bytes).map_err(|source| CodecError::Decode {
                message: desc.full_name().to_string(),
                source,
            })?;

        let options = SerializeOptions::new()
            .skip_default_fields(false)
            .stringify_64_bit_integers(true);

        message
            .serialize_with_options(serde_json::value::Serializer, &options)
            .map_err(|source| CodecError::Serialize {
                message: desc.full_name().to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_reflect::DescriptorPool;
    use serde_json::json;

    fn sample() -> MessageDescriptor {
        DescriptorPool::decode(echo_service::FILE_DESCRIPTOR_SET)
            .unwrap()
            .get_message_by_name("echo.Sample")
            .unwrap()
    }

    #[test]
    fn decode_emits_defaults_for_unpopulated_fields() {
        let codec = DynamicCodec::default();
        let desc = sample();

        let bytes = codec.encode(json!({ "name": "only" }), &desc).unwrap();
        let value = codec.decode(bytes, &desc).unwrap();

        assert_eq!(value["name"], "only");
        assert_eq!(value["big"], "0");
        assert_eq!(value["flag"], false);
        assert_eq!(value["kind"], "KIND_UNSPECIFIED");
        assert_eq!(value["items"], json!([]));
        assert_eq!(value["counters"], json!({}));
    }

    #[test]
    fn populated_messages_decode_to_their_input() {
        let codec = DynamicCodec::default();
        let desc = sample();

        let values = [
            json!({
                "name": "sample",
                "big": "9007199254740993",
                "ubig": "18446744073709551615",
                "flag": true,
                "ratio": 0.5,
                "blob": "aGk=",
                "kind": "KIND_BETA",
                "inner": { "label": "in", "values": [1, 2, 3] },
                "items": [{ "label": "first", "values": [4] }],
                "counters": { "a": "3" },
            }),
            json!({
                "name": "négatif ✓",
                "big": "-9223372036854775808",
                "ubig": "1",
                "flag": false,
                "ratio": -1250.125,
                "blob": "AAEC/w==",
                "kind": "KIND_ALPHA",
                "inner": { "label": "", "values": [-7, 2147483647] },
                "items": [
                    { "label": "a", "values": [] },
                    { "label": "b", "values": [-1, 0, 1] },
                ],
                "counters": { "x": "-1", "y": "9223372036854775807", "": "0" },
            }),
            json!({
                "name": "",
                "big": "42",
                "ubig": "0",
                "flag": true,
                "ratio": 1e-3,
                "blob": "",
                "kind": "KIND_UNSPECIFIED",
                "inner": { "label": "only", "values": [] },
                "items": [],
                "counters": {},
            }),
        ];

        for value in values {
            let bytes = codec.encode(value.clone(), &desc).unwrap();
            assert_eq!(codec.decode(bytes, &desc).unwrap(), value);
        }
    }

    #[test]
    fn sixty_four_bit_integers_accept_numbers_and_strings() {
        let codec = DynamicCodec::default();
        let desc = sample();

        let from_number = codec.encode(json!({ "big": -42 }), &desc).unwrap();
        let from_string = codec.encode(json!({ "big": "-42" }), &desc).unwrap();

        assert_eq!(from_number, from_string);
        assert_eq!(codec.decode(from_number, &desc).unwrap()["big"], "-42");
    }

    #[test]
    fn unknown_fields_follow_the_policy() {
        let desc = sample();
        let payload = json!({ "name": "x", "nope": 1 });

        let err = DynamicCodec::new(UnknownFields::Reject)
            .encode(payload.clone(), &desc)
            .unwrap_err();
        assert!(matches!(err, CodecError::Encode { message, .. } if message == "echo.Sample"));

        let bytes = DynamicCodec::new(UnknownFields::Ignore)
            .encode(payload, &desc)
            .unwrap();
        let value = DynamicCodec::default().decode(bytes, &desc).unwrap();
        assert_eq!(value["name"], "x");
        assert!(value.get("nope").is_none());
    }

    #[test]
    fn wrong_types_fail_to_encode() {
        let err = DynamicCodec::default()
            .encode(json!({ "flag": "definitely" }), &sample())
            .unwrap_err();

        assert!(matches!(err, CodecError::Encode { .. }));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = DynamicCodec::default()
            .decode(Bytes::from_static(&[0x0a, 0xff]), &sample())
            .unwrap_err();

        assert!(matches!(err, CodecError::Decode { .. }));
    }
}
