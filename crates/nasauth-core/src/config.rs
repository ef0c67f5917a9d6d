//! Configuration types for the NAS auth agent
//!
//! This module defines all configuration structures used throughout the crate.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default cloud roster endpoint
pub const DEFAULT_ROSTER_URL: &str = "https://api-manage-radius.ik.weiyunjian.com/callback/client";

/// Default captive-portal endpoint
pub const DEFAULT_PORTAL_URL: &str = "https://portal.ikuai8-wifi.com/webradius";

/// Default MQTT broker host
pub const DEFAULT_PUSH_HOST: &str = "mqtt.weiyunjian.com";

/// Main agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Cloud roster configuration
    pub roster: RosterConfig,

    /// Router web API configuration
    pub router: RouterConfig,

    /// Captive-portal configuration
    #[serde(default)]
    pub portal: PortalConfig,

    /// Push channel configuration
    #[serde(default)]
    pub push: PushConfig,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl AgentConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.roster.validate()?;
        self.router.validate()?;
        self.portal.validate()?;
        self.push.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Cloud roster configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Roster callback URL
    #[serde(default = "default_roster_url")]
    pub url: String,

    /// NAS identifier issued by the cloud service
    pub identifier: String,

    /// Access key paired with the identifier
    /// ⚠️ NEVER log this value
    pub access_key: String,

    /// Timezone the roster's `expired_at` timestamps are written in
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

impl RosterConfig {
    pub fn new(identifier: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            url: default_roster_url(),
            identifier: identifier.into(),
            access_key: access_key.into(),
            timezone: default_timezone(),
        }
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.identifier.is_empty() {
            return Err(crate::Error::config("Roster identifier cannot be empty"));
        }
        if self.access_key.is_empty() {
            return Err(crate::Error::config("Roster access key cannot be empty"));
        }
        validate_url("Roster URL", &self.url)
    }
}

// Custom Debug implementation that hides the access key
impl std::fmt::Debug for RosterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterConfig")
            .field("url", &self.url)
            .field("identifier", &self.identifier)
            .field("access_key", &"<REDACTED>")
            .field("timezone", &self.timezone)
            .finish()
    }
}

/// Router web API configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Base URL of the router's web UI (e.g., "http://192.168.1.1")
    pub endpoint: String,

    /// Web UI username
    pub username: String,

    /// Web UI password
    /// ⚠️ NEVER log this value
    pub password: String,
}

impl RouterConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.username.is_empty() {
            return Err(crate::Error::config("Router username cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(crate::Error::config("Router password cannot be empty"));
        }
        validate_url("Router endpoint", &self.endpoint)
    }
}

impl std::fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

/// Captive-portal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Portal auth URL
    #[serde(default = "default_portal_url")]
    pub url: String,

    /// Redirect target reported to the portal on success
    #[serde(default = "default_landing_url")]
    pub success_url: String,

    /// Redirect target reported to the portal on failure
    #[serde(default = "default_landing_url")]
    pub fail_url: String,
}

impl PortalConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        validate_url("Portal URL", &self.url)
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            url: default_portal_url(),
            success_url: default_landing_url(),
            fail_url: default_landing_url(),
        }
    }
}

/// Push channel (MQTT) configuration
///
/// The client id and username are the roster identifier; the password is
/// the roster access key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Broker host
    #[serde(default = "default_push_host")]
    pub host: String,

    /// Broker port
    #[serde(default = "default_push_port")]
    pub port: u16,

    /// Topic prefix; the identifier is appended
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// MQTT keep-alive (in seconds)
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl PushConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.host.is_empty() {
            return Err(crate::Error::config("Push broker host cannot be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::config("Push broker port must be > 0"));
        }
        Ok(())
    }

    /// Topic carrying the pushes for one NAS identifier
    pub fn topic_for(&self, identifier: &str) -> String {
        format!("{}{}", self.topic_prefix, identifier)
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            host: default_push_host(),
            port: default_push_port(),
            topic_prefix: default_topic_prefix(),
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between check cycles (in seconds)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    /// Interval between full roster resyncs (in seconds)
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Width of the auth dispatch worker pool
    #[serde(default = "default_auth_concurrency")]
    pub auth_concurrency: usize,

    /// Overall deadline for one check cycle (in seconds)
    ///
    /// A cycle that runs past it is abandoned and the reentrancy guard
    /// released, so a stalled external call cannot block checks forever.
    #[serde(default = "default_cycle_deadline_secs")]
    pub cycle_deadline_secs: u64,

    /// Per-request timeout for every outbound HTTP call (in seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Capacity of the engine event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.check_interval_secs == 0 {
            return Err(crate::Error::config("Check interval must be > 0"));
        }
        if self.resync_interval_secs == 0 {
            return Err(crate::Error::config("Resync interval must be > 0"));
        }
        if self.auth_concurrency == 0 {
            return Err(crate::Error::config("Auth concurrency must be > 0"));
        }
        if self.cycle_deadline_secs == 0 {
            return Err(crate::Error::config("Cycle deadline must be > 0"));
        }
        if self.http_timeout_secs == 0 {
            return Err(crate::Error::config("HTTP timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            auth_concurrency: default_auth_concurrency(),
            cycle_deadline_secs: default_cycle_deadline_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn validate_url(what: &str, url: &str) -> Result<(), crate::Error> {
    if url.is_empty() {
        return Err(crate::Error::config(format!("{} cannot be empty", what)));
    }
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(crate::Error::config(format!(
            "{} must use HTTP or HTTPS scheme. Got: {}",
            what, url
        )));
    }
    Ok(())
}

fn default_roster_url() -> String {
    DEFAULT_ROSTER_URL.to_string()
}

fn default_timezone() -> Tz {
    chrono_tz::Asia::Shanghai
}

fn default_portal_url() -> String {
    DEFAULT_PORTAL_URL.to_string()
}

fn default_landing_url() -> String {
    "https://www.baidu.com/".to_string()
}

fn default_push_host() -> String {
    DEFAULT_PUSH_HOST.to_string()
}

fn default_push_port() -> u16 {
    1883
}

fn default_topic_prefix() -> String {
    "wyj_nas_events/".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_check_interval_secs() -> u64 {
    60
}

fn default_resync_interval_secs() -> u64 {
    30 * 60
}

fn default_auth_concurrency() -> usize {
    10
}

fn default_cycle_deadline_secs() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_event_channel_capacity() -> usize {
    1000
}
