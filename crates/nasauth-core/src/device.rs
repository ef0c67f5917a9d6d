//! Device model
//!
//! A [`Device`] is one MAC address owned by a roster account. Identity and
//! credential fields come from the roster; `online`, `auth` and `ip` are
//! transient flags overwritten by every check cycle.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::error::{Error, Result};

/// Timestamp layout used by the roster service and push payloads
pub const ROSTER_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Case-normalized MAC address, the registry key
///
/// Separators `-` are turned into `:` and letters are upper-cased, so
/// `aa-bb-cc-dd-ee-ff` and `AA:BB:CC:DD:EE:FF` address the same device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse and normalize a MAC address
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .map(|c| if c == '-' { ':' } else { c.to_ascii_uppercase() })
            .collect();

        if normalized.is_empty() {
            return Err(Error::invalid_input("MAC address cannot be empty"));
        }
        if normalized.chars().any(char::is_whitespace) {
            return Err(Error::invalid_input(format!(
                "MAC address contains whitespace: {:?}",
                raw
            )));
        }

        Ok(Self(normalized))
    }

    /// The normalized string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

/// One registered network-access device
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Owning account (not unique, one account may own many MACs)
    pub name: String,

    /// Registry key
    pub mac: MacAddress,

    /// Plaintext credential presented to the captive portal
    pub password: String,

    /// Subscription deadline; also the registry TTL
    pub expired_at: DateTime<Utc>,

    /// Current address, only meaningful while `online` is true
    pub ip: Option<IpAddr>,

    /// Present in the router's online table
    pub online: bool,

    /// Present in the router's authenticated table, or just dispatched
    pub auth: bool,
}

impl Device {
    /// Create a device with all transient flags cleared
    pub fn new(
        name: impl Into<String>,
        mac: MacAddress,
        password: impl Into<String>,
        expired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            mac,
            password: password.into(),
            expired_at,
            ip: None,
            online: false,
            auth: false,
        }
    }

    /// Whether the subscription deadline has passed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expired_at <= now
    }

    /// Online, not authenticated, and with a known address
    pub fn needs_auth(&self) -> bool {
        self.online && !self.auth && self.ip.is_some()
    }

    /// Clear `online`, `auth` and `ip`
    pub fn reset_transient(&mut self) {
        self.online = false;
        self.auth = false;
        self.ip = None;
    }
}

// Custom Debug implementation that hides the password
impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("mac", &self.mac)
            .field("password", &"<REDACTED>")
            .field("expired_at", &self.expired_at)
            .field("ip", &self.ip)
            .field("online", &self.online)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Parse a roster timestamp (`YYYY-MM-DD HH:MM:SS`) in the roster's timezone
pub fn parse_roster_time(raw: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), ROSTER_TIME_FORMAT).map_err(|e| {
        Error::invalid_input(format!("Invalid roster timestamp {:?}: {}", raw, e))
    })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            Error::invalid_input(format!("Roster timestamp {:?} does not exist in {}", raw, tz))
        })
}
