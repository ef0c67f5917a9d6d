// # Push Source Trait
//
// Defines the interface for incremental roster updates pushed by the cloud
// service between full resyncs.
//
// ## Implementations
//
// - MQTT subscription: `nasauth-push-mqtt` crate
//
// ## Semantics
//
// Every push carries the *complete* current MAC list of one account. Devices
// of that account missing from the list are revoked (revocation by omission).

use chrono::{DateTime, Utc};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::device::MacAddress;

/// Incremental roster update for one account
#[derive(Clone, PartialEq, Eq)]
pub struct RosterPush {
    /// Account the push refers to
    pub account: String,
    /// New portal credential, if the push carries one
    pub password: Option<String>,
    /// New subscription deadline; when absent no device is refreshed
    pub expired_at: Option<DateTime<Utc>>,
    /// Authoritative current MAC set of the account
    pub macs: Vec<MacAddress>,
}

impl std::fmt::Debug for RosterPush {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterPush")
            .field("account", &self.account)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("expired_at", &self.expired_at)
            .field("macs", &self.macs)
            .finish()
    }
}

/// Trait for push source implementations
///
/// # Task Spawning Rules
///
/// Implementations may spawn one task that waits on the transport (broker
/// connection, socket) and forwards decoded pushes. That task must stop when
/// the returned stream is dropped.
pub trait PushSource: Send + Sync {
    /// Watch for roster pushes
    ///
    /// Returns a stream that yields one [`RosterPush`] per received message.
    /// Malformed messages are logged and skipped by the implementation.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = RosterPush> + Send + 'static>>;
}
