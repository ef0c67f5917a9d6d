// # Roster Source Trait
//
// Defines the interface for fetching the cloud roster: the authoritative
// list of paying accounts and the MAC addresses each one may authenticate.
//
// ## Implementations
//
// - Cloud callback API: `nasauth-roster-cloud` crate
//
// ## Usage
//
// ```rust,ignore
// use nasauth_core::RosterSource;
//
// let entries = roster.fetch_roster().await?;
// for entry in entries {
//     println!("{} owns {} device(s)", entry.account, entry.macs.len());
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::device::MacAddress;

/// One account in the cloud roster
#[derive(Clone, PartialEq, Eq)]
pub struct RosterEntry {
    /// Account identifier, shared by every device it owns
    pub account: String,
    /// Portal credential, shared by every device it owns
    pub password: String,
    /// Subscription deadline
    pub expired_at: DateTime<Utc>,
    /// Authorized devices
    pub macs: Vec<MacAddress>,
}

impl std::fmt::Debug for RosterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterEntry")
            .field("account", &self.account)
            .field("password", &"<REDACTED>")
            .field("expired_at", &self.expired_at)
            .field("macs", &self.macs)
            .finish()
    }
}

/// Trait for roster source implementations
///
/// Implementations make one request per call and never cache; the engine
/// decides when to resync.
///
/// # Errors
///
/// - `Error::Authentication`: the service rejected our identifier/access key
///   (fatal, the agent exits)
/// - any other error: the resync is abandoned and the registry kept as is
#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Fetch the complete roster
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<RosterEntry>)`: Every account with its devices
    /// - `Err(Error)`: If the fetch failed or the service answered non-success
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>, crate::Error>;

    /// Get the source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}
