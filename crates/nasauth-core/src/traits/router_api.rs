// # Router API Trait
//
// Defines the interface for the router's administrative web API: login,
// the online-device table, the authenticated-session table and kicks.
//
// ## Implementations
//
// - iKuai web API: `nasauth-router-ikuai` crate
//
// ## Session Tokens
//
// Every call except `login()` takes the session token explicitly. Token
// caching and re-login live in `nasauth_core::session`, never in the
// implementation.

use async_trait::async_trait;
use std::net::IpAddr;

use crate::device::MacAddress;

/// Opaque router session token
///
/// The Debug implementation never exposes the value.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw token, for building request headers only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<REDACTED>)")
    }
}

/// One row of the router's online-device table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlineDevice {
    pub mac: MacAddress,
    /// `None` when the router reported an empty or unparsable address
    pub ip: Option<IpAddr>,
}

/// Trait for router web API implementations
///
/// # Errors
///
/// - `Error::SessionExpired`: the router rejected the token (recoverable by
///   re-login, handled by `RouterSession`)
/// - `Error::Authentication`: login rejected the configured credentials (fatal)
/// - anything else: transport or protocol failure
///
/// Implementations must not retry; they execute one logical call and report.
#[async_trait]
pub trait RouterApi: Send + Sync {
    /// Log into the web API and return a fresh session token
    async fn login(&self) -> Result<SessionToken, crate::Error>;

    /// Fetch the table of devices currently online
    async fn online_devices(&self, token: &SessionToken)
    -> Result<Vec<OnlineDevice>, crate::Error>;

    /// Fetch the MACs that currently hold an authenticated session
    async fn authenticated_macs(
        &self,
        token: &SessionToken,
    ) -> Result<Vec<MacAddress>, crate::Error>;

    /// Terminate every authenticated session of a MAC
    ///
    /// # Returns
    ///
    /// The number of sessions kicked (0 when the MAC had none)
    async fn kick(&self, token: &SessionToken, mac: &MacAddress) -> Result<usize, crate::Error>;

    /// Get the router name (for logging/debugging)
    fn router_name(&self) -> &'static str;
}
