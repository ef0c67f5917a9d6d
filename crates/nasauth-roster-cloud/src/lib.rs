// # Cloud Roster Source
//
// Fetches the authoritative device roster from the cloud subscription
// service.
//
// ## API Reference
//
// ```http
// GET /callback/client
// Identifier: <nas identifier>
// Access-Key: <access key>
// ```
//
// Response envelope:
//
// ```json
// {
//   "code": 200,
//   "data": [
//     { "name": "alice", "password": "p", "expired_at": "2024-03-01 08:00:00", "mac": ["AA:BB"] }
//   ]
// }
// ```
//
// - `code` 200: success
// - `code` 42207: identifier/access key rejected (fatal)
//
// `expired_at` carries no offset; it is local time in the configured
// roster timezone.
//
// ## Security Requirements
//
// - The access key NEVER appears in logs or Debug output

use async_trait::async_trait;
use chrono_tz::Tz;
use nasauth_core::config::RosterConfig;
use nasauth_core::device::{MacAddress, parse_roster_time};
use nasauth_core::traits::{RosterEntry, RosterSource};
use nasauth_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Roster service success code
const CODE_OK: i64 = 200;

/// Roster service code for rejected credentials
const CODE_INVALID_CREDENTIALS: i64 = 42207;

/// Response envelope of the roster callback
#[derive(Debug, Deserialize)]
struct RosterResponse {
    code: i64,

    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    data: Vec<RosterAccount>,
}

/// One account as sent by the roster service
#[derive(Deserialize)]
struct RosterAccount {
    name: String,

    #[serde(default)]
    password: String,

    expired_at: String,

    #[serde(default)]
    mac: Vec<String>,
}

// Custom Debug implementation that hides the password
impl std::fmt::Debug for RosterAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RosterAccount")
            .field("name", &self.name)
            .field("expired_at", &self.expired_at)
            .field("mac", &self.mac)
            .finish()
    }
}

/// Roster source backed by the cloud callback API
pub struct CloudRosterSource {
    url: String,

    identifier: String,

    /// ⚠️ NEVER log this value
    access_key: String,

    timezone: Tz,

    client: reqwest::Client,
}

impl std::fmt::Debug for CloudRosterSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudRosterSource")
            .field("url", &self.url)
            .field("identifier", &self.identifier)
            .field("access_key", &"<REDACTED>")
            .field("timezone", &self.timezone)
            .finish()
    }
}

impl CloudRosterSource {
    /// Create a roster source from its configuration
    ///
    /// # Parameters
    ///
    /// - `config`: Roster endpoint, credentials and timezone
    /// - `timeout`: Per-request HTTP timeout
    pub fn new(config: &RosterConfig, timeout: Duration) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: config.url.clone(),
            identifier: config.identifier.clone(),
            access_key: config.access_key.clone(),
            timezone: config.timezone,
            client,
        })
    }

    /// Turn one service account into a roster entry
    ///
    /// Accounts with an unparseable expiry are dropped; unparseable MACs are
    /// dropped individually.
    fn convert(&self, account: RosterAccount) -> Option<RosterEntry> {
        let expired_at = match parse_roster_time(&account.expired_at, self.timezone) {
            Ok(at) => at,
            Err(e) => {
                tracing::warn!("Skipping roster account {}: {}", account.name, e);
                return None;
            }
        };

        let macs = account
            .mac
            .iter()
            .filter_map(|raw| match MacAddress::parse(raw) {
                Ok(mac) => Some(mac),
                Err(e) => {
                    tracing::warn!("Skipping MAC of roster account {}: {}", account.name, e);
                    None
                }
            })
            .collect();

        Some(RosterEntry {
            account: account.name,
            password: account.password,
            expired_at,
            macs,
        })
    }
}

#[async_trait]
impl RosterSource for CloudRosterSource {
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>> {
        tracing::debug!("Fetching roster from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .header("Identifier", &self.identifier)
            .header("Access-Key", &self.access_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("Roster request timed out: {}", e))
                } else {
                    Error::http(format!("Roster request failed: {}", e))
                }
            })?;

        // The service reports errors in the envelope, often alongside a 4xx status
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read roster response: {}", e)))?;

        let envelope: RosterResponse = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_success() => {
                return Err(Error::roster(format!("Malformed roster response: {}", e)));
            }
            Err(_) => {
                return Err(Error::http(format!("Roster service returned HTTP {}", status)));
            }
        };

        tracing::info!("Fetched roster, service code {}", envelope.code);

        match envelope.code {
            CODE_OK => {}
            CODE_INVALID_CREDENTIALS => {
                return Err(Error::auth("NAS identifier or access key rejected by roster service"));
            }
            code => {
                return Err(Error::roster(format!(
                    "Roster service returned code {}{}",
                    code,
                    envelope
                        .message
                        .map(|m| format!(": {}", m))
                        .unwrap_or_default()
                )));
            }
        }

        Ok(envelope
            .data
            .into_iter()
            .filter_map(|account| self.convert(account))
            .collect())
    }

    fn source_name(&self) -> &'static str {
        "cloud-roster"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup() -> (MockServer, CloudRosterSource) {
        let server = MockServer::start().await;
        let mut config = RosterConfig::new("nas-01", "key-01");
        config.url = format!("{}/callback/client", server.uri());
        let source = CloudRosterSource::new(&config, Duration::from_secs(5)).unwrap();
        (server, source)
    }

    #[tokio::test]
    async fn test_fetch_roster_success() {
        let (server, source) = setup().await;

        Mock::given(method("GET"))
            .and(path("/callback/client"))
            .and(header("Identifier", "nas-01"))
            .and(header("Access-Key", "key-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": [
                    { "name": "alice", "password": "p", "expired_at": "2030-03-01 08:00:00", "mac": ["aa:bb", "CC-DD"] },
                    { "name": "bob", "password": "q", "expired_at": "2030-03-02 00:00:00", "mac": [] }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let entries = source.fetch_roster().await.unwrap();
        assert_eq!(entries.len(), 2);

        let alice = &entries[0];
        assert_eq!(alice.account, "alice");
        assert_eq!(alice.password, "p");
        assert_eq!(alice.expired_at.to_rfc3339(), "2030-03-01T00:00:00+00:00");
        assert_eq!(
            alice.macs,
            vec![MacAddress::parse("AA:BB").unwrap(), MacAddress::parse("CC:DD").unwrap()]
        );
        assert!(entries[1].macs.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_credentials_are_fatal() {
        let (server, source) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "code": 42207,
                "message": "identifier or access key wrong"
            })))
            .mount(&server)
            .await;

        let err = source.fetch_roster().await.unwrap_err();
        assert!(matches!(err, Error::Authentication(_)), "got {:?}", err);
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_other_codes_are_transient() {
        let (server, source) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 50000,
                "message": "maintenance"
            })))
            .mount(&server)
            .await;

        let err = source.fetch_roster().await.unwrap_err();
        assert!(matches!(err, Error::Roster(ref m) if m.contains("maintenance")));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_non_json_error_page() {
        let (server, source) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>Bad Gateway</html>"))
            .mount(&server)
            .await;

        let err = source.fetch_roster().await.unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_bad_timestamp_skips_account() {
        let (server, source) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200,
                "data": [
                    { "name": "alice", "password": "p", "expired_at": "soon", "mac": ["AA:BB"] },
                    { "name": "bob", "password": "q", "expired_at": "2030-01-01 00:00:00", "mac": ["", "BB:BB"] }
                ]
            })))
            .mount(&server)
            .await;

        let entries = source.fetch_roster().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].account, "bob");
        assert_eq!(entries[0].macs, vec![MacAddress::parse("BB:BB").unwrap()]);
    }

    #[test]
    fn test_access_key_not_in_debug() {
        let config = RosterConfig::new("nas-01", "super-secret-key");
        let source = CloudRosterSource::new(&config, Duration::from_secs(5)).unwrap();
        let debug_str = format!("{:?}", source);
        assert!(!debug_str.contains("super-secret-key"));
        assert!(debug_str.contains("nas-01"));
    }
}
