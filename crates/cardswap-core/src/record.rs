//! Identity record and its wire encoding
//!
//! The record is the only payload that crosses the radio. It travels as a
//! UTF-8 JSON object in a single characteristic read, so the encoded form
//! has to fit inside one ATT value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::MAX_READ_SIZE;

// ----------------------------------------------------------------------------
// Identity Record
// ----------------------------------------------------------------------------

/// A user identity card exchanged between two devices
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityRecord {
    id: i64,
    name: String,
    title: String,
}

impl IdentityRecord {
    /// Create a new record
    pub fn new(id: i64, name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            title: title.into(),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Encode the record into its wire form
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        serde_json::to_vec(self).map_err(|e| DecodeError::Malformed(e.to_string()))
    }

    /// Encode and check the result fits in a single read of `limit` bytes
    pub fn encode_within(&self, limit: usize) -> Result<Vec<u8>, DecodeError> {
        let bytes = self.encode()?;
        if bytes.len() > limit {
            return Err(DecodeError::TooLarge {
                size: bytes.len(),
                max_size: limit,
            });
        }
        Ok(bytes)
    }

    /// Decode a record from its wire form
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        if bytes.len() > MAX_READ_SIZE {
            return Err(DecodeError::TooLarge {
                size: bytes.len(),
                max_size: MAX_READ_SIZE,
            });
        }

        let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
        serde_json::from_str(text).map_err(|e| {
            if e.is_data() {
                DecodeError::InvalidField(e.to_string())
            } else {
                DecodeError::Malformed(e.to_string())
            }
        })
    }
}

impl std::fmt::Display for IdentityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} {} ({})", self.id, self.name, self.title)
    }
}

// ----------------------------------------------------------------------------
// Decode Errors
// ----------------------------------------------------------------------------

/// Failures turning bytes into an [`IdentityRecord`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload is empty")]
    Empty,

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Payload too large: {size} bytes (max: {max_size})")]
    TooLarge { size: usize, max_size: usize },

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Record has a missing or invalid field: {0}")]
    InvalidField(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wire_format_is_plain_json() {
        let record = IdentityRecord::new(1, "A", "Eng");
        let bytes = record.encode().unwrap();
        assert_eq!(bytes, br#"{"id":1,"name":"A","title":"Eng"}"#);
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let bytes = br#"{"id":7,"name":"Kim","title":"PM","avatar":"x"}"#;
        let record = IdentityRecord::decode(bytes).unwrap();
        assert_eq!(record, IdentityRecord::new(7, "Kim", "PM"));
    }

    #[test]
    fn test_decode_rejects_missing_field() {
        let err = IdentityRecord::decode(br#"{"id":7,"name":"Kim"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidField(_)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(IdentityRecord::decode(b""), Err(DecodeError::Empty));
        assert_eq!(
            IdentityRecord::decode(&[0xff, 0xfe, 0x00]),
            Err(DecodeError::InvalidUtf8)
        );
        assert!(matches!(
            IdentityRecord::decode(b"not a card"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_encode_within_limit() {
        let record = IdentityRecord::new(1, "x".repeat(600), "Eng");
        let err = record.encode_within(MAX_READ_SIZE).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { max_size: 512, .. }));
    }

    proptest! {
        #[test]
        fn prop_round_trip(id in any::<i64>(), name in ".{0,32}", title in ".{0,32}") {
            let record = IdentityRecord::new(id, name, title);
            let bytes = record.encode().unwrap();
            prop_assert_eq!(IdentityRecord::decode(&bytes).unwrap(), record);
        }
    }
}
