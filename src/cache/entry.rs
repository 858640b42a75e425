//! Stored entry format shared by every store backend.
//!
//! A value is persisted as `<ISO-8601 expires_at>,<value>`. Only the first
//! comma separates the timestamp, so values may themselves contain commas.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Errors produced while decoding a stored entry.
///
/// A decode failure means the backing data is corrupt; it is never treated as
/// a cache miss.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("stored entry has no `,` separator after the expiry timestamp")]
    MissingSeparator,

    #[error("stored entry has an invalid expiry timestamp `{raw}`: {source}")]
    Timestamp {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("stored entry is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A value read back from a store together with its expiry time.
///
/// Stores only ever hand out complete payloads; a miss is `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub data: String,
    pub expires_at: DateTime<Utc>,
}

impl Payload {
    pub fn new(data: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            data: data.into(),
            expires_at,
        }
    }

    /// Returns `true` if this payload has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        has_expired_at(self.expires_at, now)
    }
}

/// Returns `true` once `now` has reached `expires_at` (the boundary is expired).
pub fn has_expired_at(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= expires_at
}

/// [`has_expired_at`] against the current time.
pub fn has_expired(expires_at: DateTime<Utc>) -> bool {
    has_expired_at(expires_at, Utc::now())
}

/// Encodes `value` with its expiry for storage.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use hitgate::cache::entry::encode;
///
/// let at = Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap();
/// assert_eq!(encode("7", at), "2030-01-02T03:04:05Z,7");
/// ```
pub fn encode(value: &str, expires_at: DateTime<Utc>) -> String {
    let mut encoded = expires_at.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    encoded.push(',');
    encoded.push_str(value);
    encoded
}

/// Decodes a stored entry produced by [`encode`].
///
/// Timestamps without an offset are read as UTC.
///
/// # Errors
///
/// [`DecodeError::MissingSeparator`] or [`DecodeError::Timestamp`].
pub fn decode(contents: &str) -> Result<Payload, DecodeError> {
    let (raw, data) = contents
        .split_once(',')
        .ok_or(DecodeError::MissingSeparator)?;
    let expires_at = parse_timestamp(raw)?;
    Ok(Payload::new(data, expires_at))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) => Ok(at.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| DecodeError::Timestamp {
                raw: raw.to_owned(),
                source: rfc_err,
            }),
    }
}

/// Turns raw backend contents into a live payload.
///
/// Missing contents and expired entries both come back as `None`.
pub fn process(contents: Option<String>, now: DateTime<Utc>) -> Result<Option<Payload>, DecodeError> {
    let Some(contents) = contents else {
        return Ok(None);
    };
    let payload = decode(&contents)?;
    if payload.is_expired_at(now) {
        return Ok(None);
    }
    Ok(Some(payload))
}
