use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the identifier as a plain string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(AppId, "Tenant identifier namespacing outbox rows, explorer entries and sequencer batches.");
opaque_id!(OutboxId, "Opaque unique identity of an `OutboxEvent` row.");
opaque_id!(EventId, "Identifier of an application event as it flows through the Sequencer and Explorer.");
opaque_id!(IdempotencyKey, "Deterministic key ensuring a given intent produces at most one external effect.");

/// Content hash of an event's payload, `digest` in spec.md's data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl Digest {
    /// Hex-encode the digest with a leading `0x`, matching the wire format used
    /// throughout the chain-provider and DA adapter.
    pub fn to_hex(self) -> String {
        format!("0x{}", hex_encode(&self.0))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl IdempotencyKey {
    /// Builds the default idempotency key `appId|type|digest` per spec.md §3.
    pub fn derive(app_id: &AppId, event_type: &str, digest: &Digest) -> Self {
        Self(format!("{}|{}|{}", app_id.0, event_type, digest.to_hex()))
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", super::hex_encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        if s.len() != 64 {
            return Err(D::Error::custom("expected 32-byte hex digest"));
        }
        let mut out = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let byte_str = std::str::from_utf8(chunk).map_err(D::Error::custom)?;
            out[i] = u8::from_str_radix(byte_str, 16).map_err(D::Error::custom)?;
        }
        Ok(out)
    }
}
