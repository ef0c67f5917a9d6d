// # iKuai Router Client
//
// Implements [`RouterApi`] against the iKuai web UI JSON API.
//
// ## API Reference
//
// ```http
// POST /Action/login
// { "username": "...", "passwd": md5hex(pw), "pass": base64("salt_11" + pw), "remember_password": "" }
// -> { "Result": 10000 }, Set-Cookie: sess_key=<token>
//
// POST /Action/call
// Cookie: sess_key=<token>
// { "action": "show", "func_name": "...", "param": { ... } }
// -> { "Result": 30000, "Data": { "data": [ ... ] } }
// ```
//
// - `Result` 10000: login accepted
// - `Result` 30000: call succeeded
// - `Result` 10014: session key expired
//
// This client never caches the session key and never retries; token
// management is owned by `RouterSession` in nasauth-core.
//
// ## Security Requirements
//
// - The web password and session key NEVER appear in logs

use async_trait::async_trait;
use base64::Engine;
use md5::{Digest, Md5};
use nasauth_core::config::RouterConfig;
use nasauth_core::device::MacAddress;
use nasauth_core::traits::{OnlineDevice, RouterApi, SessionToken};
use nasauth_core::{Error, Result};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};
use std::net::IpAddr;
use std::time::Duration;

/// Login accepted
const RESULT_LOGIN_OK: i64 = 10000;

/// Call succeeded
const RESULT_CALL_OK: i64 = 30000;

/// Session key expired
const RESULT_SESSION_EXPIRED: i64 = 10014;

/// Cookie carrying the session key
const SESSION_COOKIE: &str = "sess_key";

/// Prefix mixed into the base64 password field of the login payload
const LOGIN_SALT: &str = "salt_11";

/// Upper bound on rows requested from any table
const ROW_LIMIT: &str = "0,100000";

/// Columns searched by the ppp_online keyword filter
const AUTH_FINDS: &str = "username,name,ip_addr,mac,phone,comment";

/// Response envelope of every web API call
#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(rename = "Result")]
    result: i64,

    #[serde(rename = "ErrMsg", default)]
    err_msg: Option<String>,

    #[serde(rename = "Data", default)]
    data: Value,
}

impl ApiResponse {
    /// Rows under `Data.data`; a missing table means no rows
    fn rows<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        match self.data {
            Value::Object(mut table) => match table.remove("data") {
                Some(rows @ Value::Array(_)) => Ok(serde_json::from_value(rows)?),
                _ => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }
}

/// Row of the `monitor_lanip` table
#[derive(Debug, Deserialize)]
struct LanIpRow {
    #[serde(default)]
    mac: String,

    #[serde(default)]
    ip_addr: String,
}

/// Row of the `ppp_online` table
#[derive(Debug, Deserialize)]
struct PppOnlineRow {
    #[serde(default)]
    mac: String,

    /// Opaque row id, echoed back when kicking
    #[serde(default)]
    id: Value,
}

/// iKuai router web API client
pub struct IkuaiRouter {
    endpoint: String,

    username: String,

    /// ⚠️ NEVER log this value
    password: String,

    client: reqwest::Client,
}

impl std::fmt::Debug for IkuaiRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IkuaiRouter")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .finish()
    }
}

impl IkuaiRouter {
    /// Create a router client
    ///
    /// # Parameters
    ///
    /// - `config`: Router endpoint and web UI credentials
    /// - `timeout`: Per-request HTTP timeout
    pub fn new(config: &RouterConfig, timeout: Duration) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            client,
        })
    }

    /// Login payload for the configured credentials
    fn login_payload(&self) -> Value {
        let salted = format!("{}{}", LOGIN_SALT, self.password);
        json!({
            "pass": base64::engine::general_purpose::STANDARD.encode(salted.as_bytes()),
            "passwd": format!("{:x}", Md5::digest(self.password.as_bytes())),
            "remember_password": "",
            "username": self.username,
        })
    }

    /// Issue one `/Action/call` and return the rows of `Data.data`
    ///
    /// # Returns
    ///
    /// - `Ok(rows)`: `Result` was 30000
    /// - `Err(Error::SessionExpired)`: `Result` was 10014
    /// - `Err(Error)`: transport failure or any other `Result`
    async fn call<T: DeserializeOwned>(&self, token: &SessionToken, payload: Value) -> Result<Vec<T>> {
        let func = payload["func_name"].as_str().unwrap_or("?").to_string();
        tracing::debug!("Router call {} ({})", func, payload["action"]);

        let response = self
            .client
            .post(format!("{}/Action/call", self.endpoint))
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("Cookie", format!("{}={}", SESSION_COOKIE, token.expose()))
            .body(payload.to_string())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read router response: {}", e)))?;

        let envelope: ApiResponse = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                Error::router(format!("Malformed {} response: {}", func, e))
            } else {
                Error::http(format!("Router returned HTTP {} for {}", status, func))
            }
        })?;

        match envelope.result {
            RESULT_CALL_OK => envelope.rows(),
            RESULT_SESSION_EXPIRED => Err(Error::SessionExpired),
            code => Err(Error::router(format!(
                "{} failed with Result {}{}",
                func,
                code,
                envelope.err_msg.map(|m| format!(": {}", m)).unwrap_or_default()
            ))),
        }
    }

    /// Search the authenticated table for rows matching `keyword`
    async fn ppp_online(&self, token: &SessionToken, keyword: &str) -> Result<Vec<PppOnlineRow>> {
        let (order, order_by) = if keyword.is_empty() { ("", "") } else { ("asc", "auth_time") };
        self.call(
            token,
            json!({
                "action": "show",
                "func_name": "ppp_online",
                "param": {
                    "FINDS": AUTH_FINDS,
                    "KEYWORDS": keyword,
                    "ORDER": order,
                    "ORDER_BY": order_by,
                    "TYPE": "data,total",
                    "limit": ROW_LIMIT,
                },
            }),
        )
        .await
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::timeout(format!("Router request timed out: {}", e))
    } else {
        Error::http(format!("Router request failed: {}", e))
    }
}

/// Parse a router MAC, skipping rows the router fills with junk
fn row_mac(raw: &str) -> Option<MacAddress> {
    match MacAddress::parse(raw) {
        Ok(mac) => Some(mac),
        Err(_) => {
            tracing::debug!("Ignoring router row with MAC {:?}", raw);
            None
        }
    }
}

#[async_trait]
impl RouterApi for IkuaiRouter {
    async fn login(&self) -> Result<SessionToken> {
        tracing::debug!("Logging in to router at {} as {}", self.endpoint, self.username);

        let response = self
            .client
            .post(format!("{}/Action/login", self.endpoint))
            .json(&self.login_payload())
            .send()
            .await
            .map_err(transport_error)?;

        let session_key = response
            .cookies()
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .map(|cookie| cookie.value().to_string());

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::http(format!("Failed to read login response: {}", e)))?;

        let envelope: ApiResponse = serde_json::from_str(&body).map_err(|e| {
            if status.is_success() {
                Error::router(format!("Malformed login response: {}", e))
            } else {
                Error::http(format!("Router returned HTTP {} for login", status))
            }
        })?;

        if envelope.result != RESULT_LOGIN_OK {
            return Err(Error::auth(format!(
                "Router rejected web credentials for {} (Result {})",
                self.username, envelope.result
            )));
        }

        match session_key {
            Some(key) if !key.is_empty() => Ok(SessionToken::new(key)),
            _ => Err(Error::auth("Router login returned no session key")),
        }
    }

    async fn online_devices(&self, token: &SessionToken) -> Result<Vec<OnlineDevice>> {
        let rows: Vec<LanIpRow> = self
            .call(
                token,
                json!({
                    "action": "show",
                    "func_name": "monitor_lanip",
                    "param": {
                        "ORDER": "",
                        "ORDER_BY": "ip_addr_int",
                        "TYPE": "data,total",
                        "limit": ROW_LIMIT,
                        "orderType": "IP",
                    },
                }),
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let mac = row_mac(&row.mac)?;
                let ip = row.ip_addr.trim().parse::<IpAddr>().ok();
                Some(OnlineDevice { mac, ip })
            })
            .collect())
    }

    async fn authenticated_macs(&self, token: &SessionToken) -> Result<Vec<MacAddress>> {
        let rows = self.ppp_online(token, "").await?;
        Ok(rows.iter().filter_map(|row| row_mac(&row.mac)).collect())
    }

    async fn kick(&self, token: &SessionToken, mac: &MacAddress) -> Result<usize> {
        // The router stores MACs in lower case and its keyword search matches
        // substrings of any column, so re-check the MAC on every row
        let keyword = mac.as_str().to_ascii_lowercase();
        let rows = self.ppp_online(token, &keyword).await?;
        let targets: Vec<Value> = rows
            .into_iter()
            .filter(|row| row_mac(&row.mac).as_ref() == Some(mac))
            .map(|row| row.id)
            .collect();

        for id in &targets {
            self.call::<IgnoredAny>(
                token,
                json!({
                    "action": "kick",
                    "func_name": "ppp_online",
                    "param": { "id": id },
                }),
            )
            .await?;
        }

        if targets.is_empty() {
            tracing::debug!("No authenticated session to kick for {}", mac);
        } else {
            tracing::info!("Kicked {} session(s) of {}", targets.len(), mac);
        }
        Ok(targets.len())
    }

    fn router_name(&self) -> &'static str {
        "ikuai"
    }
}
