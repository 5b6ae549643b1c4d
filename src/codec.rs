use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The wire envelope: `{id, from, message}`. `message` is left as an
/// arbitrary JSON value so unknown/application-defined fields inside it
/// pass through unexamined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub from: String,
    pub message: serde_json::Value,
}

impl Envelope {
    pub fn new(id: Uuid, from: impl Into<String>, message: serde_json::Value) -> Self {
        Self {
            id,
            from: from.into(),
            message,
        }
    }
}

/// Selects how envelopes are packed onto the wire. Both modes must stay
/// byte-compatible with any other producer/consumer using the same mode;
/// mixing modes across a producer/consumer pair is a documented
/// incompatibility (spec §8, scenario 3), not a bug this type guards against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Plain,
    Gzip,
}

impl Codec {
    pub fn from_use_gzip(use_gzip: bool) -> Self {
        if use_gzip {
            Codec::Gzip
        } else {
            Codec::Plain
        }
    }

    pub fn pack(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(envelope).map_err(Error::Decode)?;
        match self {
            Codec::Plain => Ok(json),
            Codec::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&json)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn unpack(&self, data: &[u8]) -> Result<Envelope> {
        let json = match self {
            Codec::Plain => data.to_vec(),
            Codec::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut buf = Vec::new();
                decoder.read_to_end(&mut buf)?;
                buf
            }
        };
        serde_json::from_slice(&json).map_err(Error::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Envelope {
        Envelope::new(Uuid::new_v4(), "sender-queue", json!({"a": 1, "nested": {"b": true}}))
    }

    #[test]
    fn plain_round_trips() {
        let codec = Codec::Plain;
        let envelope = sample();
        let packed = codec.pack(&envelope).unwrap();
        let unpacked = codec.unpack(&packed).unwrap();
        assert_eq!(envelope, unpacked);
    }

    #[test]
    fn gzip_round_trips() {
        let codec = Codec::Gzip;
        let envelope = sample();
        let packed = codec.pack(&envelope).unwrap();
        // Gzip output must differ from the plain JSON for a non-trivial payload.
        assert_ne!(packed, serde_json::to_vec(&envelope).unwrap());
        let unpacked = codec.unpack(&packed).unwrap();
        assert_eq!(envelope, unpacked);
    }

    #[test]
    fn mismatched_mode_fails_to_decode() {
        let envelope = sample();
        let packed = Codec::Gzip.pack(&envelope).unwrap();
        assert!(Codec::Plain.unpack(&packed).is_err());
    }

    #[test]
    fn unknown_fields_pass_through() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4().to_string(),
            "from": "q",
            "message": {"x": 1},
            "extra": "ignored-by-type-but-present-in-json"
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        let envelope = Codec::Plain.unpack(&bytes).unwrap();
        assert_eq!(envelope.from, "q");
    }
}
