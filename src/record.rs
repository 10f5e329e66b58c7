use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a record's payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum RecordKind {
    /// Raw packet bytes as received.
    Raw = 1,
    /// JSON-encoded decommutated packet.
    Json = 2,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Raw => "raw",
            RecordKind::Json => "json",
        }
    }
}

impl TryFrom<u8> for RecordKind {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordKind::Raw),
            2 => Ok(RecordKind::Json),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

impl FromStr for RecordKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(RecordKind::Raw),
            "json" => Ok(RecordKind::Json),
            _ => Err(Error::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timestamped telemetry packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub timestamp_ns: u64,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(timestamp_ns: u64, kind: RecordKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp_ns,
            kind,
            payload: payload.into(),
        }
    }

    pub fn raw(timestamp_ns: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(timestamp_ns, RecordKind::Raw, payload)
    }
}

/// Where a record came from in the upstream message stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamPosition {
    pub topic: String,
    pub offset: u64,
}

impl StreamPosition {
    pub fn new(topic: impl Into<String>, offset: u64) -> Self {
        Self {
            topic: topic.into(),
            offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind_fails_fast() {
        assert!(matches!(RecordKind::try_from(0), Err(Error::UnknownKind(_))));
        assert!(matches!("cbor".parse::<RecordKind>(), Err(Error::UnknownKind(_))));
        assert_eq!("JSON".parse::<RecordKind>().unwrap(), RecordKind::Json);
        assert_eq!(RecordKind::try_from(RecordKind::Raw as u8).unwrap(), RecordKind::Raw);
    }
}
