//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID
//! Execution events are correlated by an id that travels through the tenant's
//! handler and comes back in its completion response, so the id has to survive
//! a round trip through a plain string.
//!
//! `Id<T>` keeps the phantom-marker pattern: `T` costs nothing at runtime but
//! keeps different id kinds from being mixed up at compile time.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each id kind.
///
/// Provides the prefix used by `Display` / `FromStr` (e.g. "event-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ULID-backed id.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{0}'")]
pub struct ParseIdError(String);

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(T::prefix())
            .ok_or_else(|| ParseIdError(s.to_string()))?;
        let ulid = Ulid::from_string(raw).map_err(|_| ParseIdError(s.to_string()))?;
        Ok(Self::from_ulid(ulid))
    }
}

// 文字列として往復させる（"event-01H..."）
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Execution event marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {}

impl IdMarker for Event {
    fn prefix() -> &'static str {
        "event-"
    }
}

/// Identifier of one execution event (one delivery of a fired task).
pub type EventId = Id<Event>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_prefix_and_parses_back() {
        let id = EventId::from_ulid(Ulid::new());
        let s = id.to_string();
        assert!(s.starts_with("event-"));

        let back: EventId = s.parse().unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn parse_rejects_foreign_strings() {
        assert!("job-01H00000000000000000000000".parse::<EventId>().is_err());
        assert!("event-not-a-ulid".parse::<EventId>().is_err());
        assert!("".parse::<EventId>().is_err());
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = EventId::from_ulid(Ulid::new());
        let v = serde_json::to_value(id).unwrap();
        assert_eq!(v, serde_json::Value::String(id.to_string()));

        let back: EventId = serde_json::from_value(v).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<EventId>(), size_of::<Ulid>());
    }
}
