//! Connection records.
//!
//! A record is the durable, deterministically identified log entry for one
//! verified card exchange. Only the sorted id pair and the integer Unix
//! timestamp feed the `connection_id`; the ISO-8601 string and UTC offset are
//! display data.

use chrono::{DateTime, FixedOffset, Local, Offset, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use cardswap_crypto::connection_id;

/// Immutable encounter record. Serializes to the persisted/display JSON shape.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    #[serde(rename = "connectionId")]
    pub connection_id: String,
    pub method: String,
    #[serde(rename = "meUserId")]
    pub local_user_id: String,
    #[serde(rename = "peerUserId")]
    pub peer_user_id: String,
    #[serde(rename = "peerDisplayName")]
    pub peer_display_name: String,
    #[serde(rename = "peerPubKeyFingerprint")]
    pub peer_public_key_fingerprint_hex: String,
    #[serde(rename = "unixTs")]
    pub unix_timestamp: i64,
    #[serde(rename = "iso8601")]
    pub iso8601_timestamp: String,
    #[serde(rename = "timezoneSecondsFromGMT")]
    pub utc_offset_seconds: i32,
}

/// Where the display UTC offset comes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OffsetSource {
    /// System local time zone at the record's instant
    #[default]
    Local,
    Fixed(FixedOffset),
}

/// Builds connection records.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordFactory {
    offset: OffsetSource,
}

impl RecordFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed display offset instead of the local zone.
    pub fn with_fixed_offset(offset: FixedOffset) -> Self {
        Self {
            offset: OffsetSource::Fixed(offset),
        }
    }

    /// Derive a record for an encounter at `at`.
    ///
    /// `local_id == peer_id` is allowed and yields `sha256hex("x|x|ts")`.
    pub fn create(
        &self,
        method: &str,
        local_id: &str,
        peer_id: &str,
        peer_display_name: &str,
        peer_fingerprint: &str,
        at: DateTime<Utc>,
    ) -> ConnectionRecord {
        let unix_timestamp = at.timestamp();
        ConnectionRecord {
            connection_id: connection_id(local_id, peer_id, unix_timestamp),
            method: method.to_string(),
            local_user_id: local_id.to_string(),
            peer_user_id: peer_id.to_string(),
            peer_display_name: peer_display_name.to_string(),
            peer_public_key_fingerprint_hex: peer_fingerprint.to_string(),
            unix_timestamp,
            iso8601_timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            utc_offset_seconds: self.offset_at(at),
        }
    }

    fn offset_at(&self, at: DateTime<Utc>) -> i32 {
        match self.offset {
            OffsetSource::Local => Local
                .offset_from_utc_datetime(&at.naive_utc())
                .fix()
                .local_minus_utc(),
            OffsetSource::Fixed(offset) => offset.local_minus_utc(),
        }
    }
}
