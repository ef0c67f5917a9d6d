// # Portal Authenticator Trait
//
// Defines the interface for the captive-portal auth call that lets an
// online device's traffic through.

use async_trait::async_trait;
use std::net::IpAddr;

use crate::device::{Device, MacAddress};

/// Arguments of one captive-portal auth call
#[derive(Clone, PartialEq, Eq)]
pub struct PortalAuthRequest {
    pub username: String,
    pub password: String,
    pub ip: IpAddr,
    pub mac: MacAddress,
}

impl PortalAuthRequest {
    /// Build a request for a device; `None` when the device has no address
    pub fn for_device(device: &Device) -> Option<Self> {
        Some(Self {
            username: device.name.clone(),
            password: device.password.clone(),
            ip: device.ip?,
            mac: device.mac.clone(),
        })
    }
}

impl std::fmt::Debug for PortalAuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalAuthRequest")
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("ip", &self.ip)
            .field("mac", &self.mac)
            .finish()
    }
}

/// Trait for captive-portal implementations
///
/// This is a best-effort fire call: the portal's response body is not
/// inspected. `Ok(())` means the request was delivered and answered; an
/// error means it never reached the portal (transport failure, timeout).
#[async_trait]
pub trait PortalAuthenticator: Send + Sync {
    /// Ask the portal to authorize one device
    async fn authenticate(&self, request: &PortalAuthRequest) -> Result<(), crate::Error>;

    /// Get the portal name (for logging/debugging)
    fn portal_name(&self) -> &'static str;
}
