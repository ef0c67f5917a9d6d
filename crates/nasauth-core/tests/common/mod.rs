//! Test doubles and common utilities for contract tests
//!
//! Every double shares its state through `Arc`s and is `Clone`, so a test can
//! hand one clone to the engine and keep another to inspect calls.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use nasauth_core::config::EngineConfig;
use nasauth_core::device::MacAddress;
use nasauth_core::error::{Error, Result};
use nasauth_core::traits::{
    OnlineDevice, PortalAuthRequest, PortalAuthenticator, PushSource, RosterEntry, RosterPush,
    RosterSource, RouterApi, SessionToken,
};
use std::collections::HashSet;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::Stream;

pub fn mac(raw: &str) -> MacAddress {
    MacAddress::parse(raw).unwrap()
}

pub fn ip(raw: &str) -> IpAddr {
    raw.parse().unwrap()
}

pub fn in_hours(hours: i64) -> DateTime<Utc> {
    Utc::now() + Duration::hours(hours)
}

/// Roster account valid for `hours` from now
pub fn entry(account: &str, password: &str, hours: i64, macs: &[&str]) -> RosterEntry {
    RosterEntry {
        account: account.to_string(),
        password: password.to_string(),
        expired_at: in_hours(hours),
        macs: macs.iter().map(|m| mac(m)).collect(),
    }
}

pub fn push(account: &str, password: Option<&str>, hours: Option<i64>, macs: &[&str]) -> RosterPush {
    RosterPush {
        account: account.to_string(),
        password: password.map(str::to_string),
        expired_at: hours.map(in_hours),
        macs: macs.iter().map(|m| mac(m)).collect(),
    }
}

pub fn online(mac_raw: &str, ip_raw: &str) -> OnlineDevice {
    OnlineDevice {
        mac: mac(mac_raw),
        ip: Some(ip(ip_raw)),
    }
}

/// Engine settings with long timers so only explicit calls drive the engine
pub fn minimal_config() -> EngineConfig {
    EngineConfig {
        check_interval_secs: 3600,
        resync_interval_secs: 3600,
        auth_concurrency: 4,
        cycle_deadline_secs: 30,
        ..EngineConfig::default()
    }
}

/// How the mock roster fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterFailure {
    Transient,
    InvalidCredentials,
}

/// Roster source returning whatever the test sets
#[derive(Clone, Default)]
pub struct MockRosterSource {
    entries: Arc<Mutex<Vec<RosterEntry>>>,
    failure: Arc<Mutex<Option<RosterFailure>>>,
    fetch_count: Arc<AtomicUsize>,
}

impl MockRosterSource {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        let source = Self::default();
        source.set_entries(entries);
        source
    }

    pub fn set_entries(&self, entries: Vec<RosterEntry>) {
        *self.entries.lock().unwrap() = entries;
    }

    pub fn fail_with(&self, failure: Option<RosterFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RosterSource for MockRosterSource {
    async fn fetch_roster(&self) -> Result<Vec<RosterEntry>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        match *self.failure.lock().unwrap() {
            Some(RosterFailure::Transient) => Err(Error::http("roster unreachable")),
            Some(RosterFailure::InvalidCredentials) => Err(Error::auth("invalid access key")),
            None => Ok(self.entries.lock().unwrap().clone()),
        }
    }

    fn source_name(&self) -> &'static str {
        "mock-roster"
    }
}

/// Router whose tables, failures and token expiry are set by the test
#[derive(Clone, Default)]
pub struct MockRouter {
    online: Arc<Mutex<Vec<OnlineDevice>>>,
    authenticated: Arc<Mutex<Vec<MacAddress>>>,
    fail_online: Arc<AtomicBool>,
    fail_authenticated: Arc<AtomicBool>,
    /// Number of upcoming calls answered with "session expired"
    expire_next: Arc<AtomicUsize>,
    /// Delay applied to the online-table fetch
    online_delay_ms: Arc<AtomicU64>,
    login_count: Arc<AtomicUsize>,
    online_calls: Arc<AtomicUsize>,
    kicked: Arc<Mutex<Vec<MacAddress>>>,
}

impl MockRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, rows: Vec<OnlineDevice>) {
        *self.online.lock().unwrap() = rows;
    }

    pub fn set_authenticated(&self, macs: Vec<MacAddress>) {
        *self.authenticated.lock().unwrap() = macs;
    }

    pub fn fail_online(&self, fail: bool) {
        self.fail_online.store(fail, Ordering::SeqCst);
    }

    pub fn fail_authenticated(&self, fail: bool) {
        self.fail_authenticated.store(fail, Ordering::SeqCst);
    }

    pub fn expire_next_calls(&self, n: usize) {
        self.expire_next.store(n, Ordering::SeqCst);
    }

    pub fn delay_online(&self, delay: std::time::Duration) {
        self.online_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn login_count(&self) -> usize {
        self.login_count.load(Ordering::SeqCst)
    }

    pub fn online_calls(&self) -> usize {
        self.online_calls.load(Ordering::SeqCst)
    }

    pub fn kicked(&self) -> Vec<MacAddress> {
        self.kicked.lock().unwrap().clone()
    }

    fn take_expiry(&self) -> bool {
        self.expire_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl RouterApi for MockRouter {
    async fn login(&self) -> Result<SessionToken> {
        let n = self.login_count.fetch_add(1, Ordering::SeqCst);
        Ok(SessionToken::new(format!("sess-{}", n)))
    }

    async fn online_devices(&self, _token: &SessionToken) -> Result<Vec<OnlineDevice>> {
        self.online_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.online_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.take_expiry() {
            return Err(Error::SessionExpired);
        }
        if self.fail_online.load(Ordering::SeqCst) {
            return Err(Error::router("online table unavailable"));
        }
        Ok(self.online.lock().unwrap().clone())
    }

    async fn authenticated_macs(&self, _token: &SessionToken) -> Result<Vec<MacAddress>> {
        if self.take_expiry() {
            return Err(Error::SessionExpired);
        }
        if self.fail_authenticated.load(Ordering::SeqCst) {
            return Err(Error::router("authenticated table unavailable"));
        }
        Ok(self.authenticated.lock().unwrap().clone())
    }

    async fn kick(&self, _token: &SessionToken, mac: &MacAddress) -> Result<usize> {
        if self.take_expiry() {
            return Err(Error::SessionExpired);
        }
        self.kicked.lock().unwrap().push(mac.clone());
        Ok(1)
    }

    fn router_name(&self) -> &'static str {
        "mock-router"
    }
}

/// Portal recording every auth call
#[derive(Clone, Default)]
pub struct MockPortal {
    calls: Arc<Mutex<Vec<PortalAuthRequest>>>,
    failing: Arc<Mutex<HashSet<MacAddress>>>,
    delay_ms: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockPortal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make calls for `mac` fail at the transport level
    pub fn fail_for(&self, mac: MacAddress) {
        self.failing.lock().unwrap().insert(mac);
    }

    pub fn delay(&self, delay: std::time::Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<PortalAuthRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Highest number of calls observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PortalAuthenticator for MockPortal {
    async fn authenticate(&self, request: &PortalAuthRequest) -> Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        self.calls.lock().unwrap().push(request.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&request.mac) {
            return Err(Error::http("portal unreachable"));
        }
        Ok(())
    }

    fn portal_name(&self) -> &'static str {
        "mock-portal"
    }
}

/// A push source the test feeds by hand
pub struct ControlledPushSource {
    engine_rx: Mutex<Option<mpsc::UnboundedReceiver<RosterPush>>>,
}

impl ControlledPushSource {
    pub fn new() -> (Self, mpsc::UnboundedSender<RosterPush>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                engine_rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl PushSource for ControlledPushSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = RosterPush> + Send + 'static>> {
        let rx = self
            .engine_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch() can only be called once");
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }
}

/// A push source that never emits
pub struct IdlePushSource;

impl PushSource for IdlePushSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = RosterPush> + Send + 'static>> {
        Box::pin(tokio_stream::pending::<RosterPush>())
    }
}

/// Engine wired to fresh doubles, with handles to inspect them
pub struct Harness {
    pub engine: Arc<nasauth_core::AuthEngine>,
    pub events: mpsc::Receiver<nasauth_core::EngineEvent>,
    pub roster: MockRosterSource,
    pub router: MockRouter,
    pub portal: MockPortal,
}

impl Harness {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        Self::with_config(entries, minimal_config())
    }

    pub fn with_config(entries: Vec<RosterEntry>, config: EngineConfig) -> Self {
        Self::build(entries, config, Box::new(IdlePushSource))
    }

    pub fn build(entries: Vec<RosterEntry>, config: EngineConfig, push_source: Box<dyn PushSource>) -> Self {
        let roster = MockRosterSource::new(entries);
        let router = MockRouter::new();
        let portal = MockPortal::new();

        let (engine, events) = nasauth_core::AuthEngine::new(
            Box::new(roster.clone()),
            push_source,
            Box::new(router.clone()),
            Box::new(portal.clone()),
            config,
        )
        .expect("engine construction succeeds");

        Self {
            engine: Arc::new(engine),
            events,
            roster,
            router,
            portal,
        }
    }

    /// Drain every event emitted so far
    pub fn drain_events(&mut self) -> Vec<nasauth_core::EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
