//! Router session management
//!
//! [`SessionTokenCache`] owns the single router session token. It is the only
//! place that calls [`RouterApi::login`], and its mutex is held across the
//! login so concurrent callers never race redundant logins.
//!
//! [`RouterSession`] wraps the cache and exposes the router calls the engine
//! needs, each with a bounded re-login: when the router answers "token
//! expired", the stale token is invalidated, a fresh one acquired, and the
//! call retried exactly once.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::device::MacAddress;
use crate::error::{Error, Result};
use crate::traits::{OnlineDevice, RouterApi, SessionToken};

/// Single-slot cache for the router session token
pub struct SessionTokenCache {
    router: Arc<dyn RouterApi>,
    slot: Mutex<Option<SessionToken>>,
}

impl SessionTokenCache {
    /// Create an empty cache; the first `get_token()` logs in
    pub fn new(router: Arc<dyn RouterApi>) -> Self {
        Self {
            router,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached token, logging in first if the slot is empty
    ///
    /// # Errors
    ///
    /// Propagates the login error; `Error::Authentication` means the router
    /// rejected the configured credentials.
    pub async fn get_token(&self) -> Result<SessionToken> {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }

        debug!("No router session token cached, logging in to {}", self.router.router_name());
        let token = self.router.login().await?;
        info!("Logged in to router {}", self.router.router_name());
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Drop `stale` from the cache
    ///
    /// Does nothing when the slot already holds a different token, so a
    /// caller cannot discard a token another caller has just refreshed.
    pub async fn invalidate(&self, stale: &SessionToken) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref() == Some(stale) {
            *slot = None;
        }
    }

    /// Whether a token is currently cached
    pub async fn is_cached(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

/// Router calls with token management and bounded re-login
pub struct RouterSession {
    router: Arc<dyn RouterApi>,
    tokens: SessionTokenCache,
}

impl RouterSession {
    pub fn new(router: Arc<dyn RouterApi>) -> Self {
        Self {
            tokens: SessionTokenCache::new(Arc::clone(&router)),
            router,
        }
    }

    /// The token cache backing this session
    pub fn tokens(&self) -> &SessionTokenCache {
        &self.tokens
    }

    /// Fetch the router's online-device table
    pub async fn online_devices(&self) -> Result<Vec<OnlineDevice>> {
        let router = self.router.as_ref();
        self.call("online_devices", move |token| async move {
            router.online_devices(&token).await
        })
        .await
    }

    /// Fetch the router's authenticated-session table
    pub async fn authenticated_macs(&self) -> Result<Vec<MacAddress>> {
        let router = self.router.as_ref();
        self.call("authenticated_macs", move |token| async move {
            router.authenticated_macs(&token).await
        })
        .await
    }

    /// Kick every authenticated session of `mac`
    pub async fn kick(&self, mac: &MacAddress) -> Result<usize> {
        let router = self.router.as_ref();
        self.call("kick", move |token| async move { router.kick(&token, mac).await })
            .await
    }

    /// Run `op` with the cached token, re-logging in at most once
    async fn call<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T>
    where
        F: Fn(SessionToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let token = self.tokens.get_token().await?;
        match op(token.clone()).await {
            Err(Error::SessionExpired) => {
                warn!("Router session token expired during {}, logging in again", operation);
                self.tokens.invalidate(&token).await;
            }
            other => return other,
        }

        let token = self.tokens.get_token().await?;
        match op(token.clone()).await {
            Err(Error::SessionExpired) => {
                self.tokens.invalidate(&token).await;
                Err(Error::SessionRetryExhausted { operation })
            }
            other => other,
        }
    }
}
