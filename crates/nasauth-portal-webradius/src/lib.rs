// # WebRADIUS Portal Authenticator
//
// Drives the captive portal's WebRADIUS endpoint for one device.
//
// ## API Reference
//
// ```http
// GET /webradius?usrname=..&passwd=..&usrmac=..&usrip=..&success=..&fail=..
// ```
//
// The portal answers with a redirect page whose content carries no usable
// verdict. Any HTTP response counts as a completed call; only transport
// failures and timeouts are errors.

use async_trait::async_trait;
use nasauth_core::config::PortalConfig;
use nasauth_core::traits::{PortalAuthRequest, PortalAuthenticator};
use nasauth_core::{Error, Result};
use std::time::Duration;

/// WebRADIUS captive-portal client
#[derive(Debug)]
pub struct WebRadiusPortal {
    url: String,
    success_url: String,
    fail_url: String,
    client: reqwest::Client,
}

impl WebRadiusPortal {
    /// Create a portal client
    ///
    /// Redirects are not followed: the first response already completes the
    /// auth call.
    pub fn new(config: &PortalConfig, timeout: Duration) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: config.url.clone(),
            success_url: config.success_url.clone(),
            fail_url: config.fail_url.clone(),
            client,
        })
    }
}

#[async_trait]
impl PortalAuthenticator for WebRadiusPortal {
    async fn authenticate(&self, request: &PortalAuthRequest) -> Result<()> {
        let ip = request.ip.to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("usrname", request.username.as_str()),
                ("passwd", request.password.as_str()),
                ("usrmac", request.mac.as_str()),
                ("usrip", ip.as_str()),
                ("success", self.success_url.as_str()),
                ("fail", self.fail_url.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("Portal request for {} timed out", request.mac))
                } else {
                    // Drop the URL: its query string carries the password
                    Error::portal(format!(
                        "Portal request for {} failed: {}",
                        request.mac,
                        e.without_url()
                    ))
                }
            })?;

        let status = response.status();
        if !status.is_success() && !status.is_redirection() {
            tracing::debug!("Portal answered HTTP {} for {}", status, request.mac);
        }
        Ok(())
    }

    fn portal_name(&self) -> &'static str {
        "webradius"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nasauth_core::device::MacAddress;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> PortalAuthRequest {
        PortalAuthRequest {
            username: "alice".to_string(),
            password: "p&q".to_string(),
            ip: "10.0.0.5".parse().unwrap(),
            mac: MacAddress::parse("AA:BB:CC:DD:EE:FF").unwrap(),
        }
    }

    async fn setup() -> (MockServer, WebRadiusPortal) {
        let server = MockServer::start().await;
        let config = PortalConfig {
            url: format!("{}/webradius", server.uri()),
            ..PortalConfig::default()
        };
        let portal = WebRadiusPortal::new(&config, Duration::from_secs(2)).unwrap();
        (server, portal)
    }

    #[tokio::test]
    async fn test_sends_device_credentials() {
        let (server, portal) = setup().await;

        Mock::given(method("GET"))
            .and(path("/webradius"))
            .and(query_param("usrname", "alice"))
            .and(query_param("passwd", "p&q"))
            .and(query_param("usrmac", "AA:BB:CC:DD:EE:FF"))
            .and(query_param("usrip", "10.0.0.5"))
            .and(query_param("success", "https://www.baidu.com/"))
            .and(query_param("fail", "https://www.baidu.com/"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "https://www.baidu.com/"))
            .expect(1)
            .mount(&server)
            .await;

        portal.authenticate(&request()).await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_still_completes() {
        let (server, portal) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(portal.authenticate(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let (server, portal) = setup().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let err = portal.authenticate(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {:?}", err);
        assert!(!err.to_string().contains("p&q"));
    }

    #[tokio::test]
    async fn test_unreachable_portal_is_error() {
        let config = PortalConfig {
            url: "http://127.0.0.1:9/webradius".to_string(),
            ..PortalConfig::default()
        };
        let portal = WebRadiusPortal::new(&config, Duration::from_secs(2)).unwrap();

        let err = portal.authenticate(&request()).await.unwrap_err();
        assert!(matches!(err, Error::Portal(_) | Error::Timeout(_)), "got {:?}", err);
        assert!(!err.to_string().contains("p&q"));
    }
}
