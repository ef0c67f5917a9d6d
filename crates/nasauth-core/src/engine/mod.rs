//! Core auth engine
//!
//! The AuthEngine is responsible for:
//! - Keeping the device registry in sync with the cloud roster (full resync
//!   and incremental pushes, including revocation by omission)
//! - Reconciling each device's transient flags against the router tables
//! - Dispatching captive-portal auth calls for online-but-unauthenticated
//!   devices through a bounded worker pool
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ RosterSource │   │  PushSource  │
//! └──────────────┘   └──────────────┘
//!        │ full resync      │ RosterPush
//!        ▼                  ▼
//!      ┌──────────────────────────┐        ┌────────────────┐
//!      │        AuthEngine        │◀──────▶│ DeviceRegistry │
//!      └──────────────────────────┘        └────────────────┘
//!        │ check cycle       │ auth dispatch
//!        ▼                   ▼
//! ┌───────────────┐   ┌─────────────────────┐
//! │ RouterSession │   │ PortalAuthenticator │
//! └───────────────┘   └─────────────────────┘
//! ```
//!
//! ## Check Cycle
//!
//! 1. Drop expired registry entries
//! 2. Fetch the router's online table and authenticated table
//! 3. In one registry transaction: reset `online`/`auth`/`ip` on every
//!    device, then apply both tables
//! 4. Dispatch every device that is online, unauthenticated and has an IP
//! 5. Mark every dispatched device as authenticated once all calls return
//!
//! Both router tables are fetched before the registry is touched: a failed
//! fetch aborts the cycle and leaves the previous flags in place.
//!
//! At most one check cycle runs at a time. A cycle triggered while another is
//! in flight is skipped, not queued.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::net::IpAddr;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::device::{Device, MacAddress};
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;
use crate::session::RouterSession;
use crate::traits::{PortalAuthRequest, PortalAuthenticator, PushSource, RosterPush, RosterSource, RouterApi};

/// Events emitted by the AuthEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started,

    /// Full roster resync replaced the registry
    ResyncCompleted {
        accounts: usize,
        devices: usize,
    },

    /// Full roster resync failed; the registry was left untouched
    ResyncFailed {
        error: String,
    },

    /// Incremental push applied
    PushApplied {
        account: String,
        refreshed: usize,
        revoked: usize,
    },

    /// Revoked device kicked at the router
    DeviceKicked {
        mac: MacAddress,
        sessions: usize,
    },

    /// Router tables applied to the registry
    StateReconciled {
        online: usize,
        authenticated: usize,
    },

    /// Captive-portal auth call completed for a device
    DeviceAuthed {
        mac: MacAddress,
        ip: IpAddr,
    },

    /// Captive-portal auth call failed for a device
    AuthFailed {
        mac: MacAddress,
        error: String,
    },

    /// Check cycle finished
    CycleCompleted {
        dispatched: usize,
        authed: usize,
    },

    /// Check cycle skipped because another was in flight
    CycleSkipped,

    /// Engine stopped
    Stopped {
        reason: String,
    },
}

/// Result of one incremental push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Devices created or refreshed
    pub refreshed: usize,
    /// Devices removed because the push no longer lists them
    pub revoked: Vec<MacAddress>,
}

/// Result of applying the router tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Registry devices found in the online table
    pub online: usize,
    /// Registry devices found in the authenticated table
    pub authenticated: usize,
}

/// Result of one auth dispatch round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Auth calls issued
    pub dispatched: usize,
    /// Devices marked authenticated afterwards
    pub authed: usize,
    /// Auth calls that failed to reach the portal
    pub failed: usize,
}

/// Result of one check cycle trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed {
        reconcile: ReconcileReport,
        dispatch: DispatchReport,
    },
    /// Another cycle was in flight
    Skipped,
}

/// Core auth engine
///
/// ## Lifecycle
///
/// 1. Create with [`AuthEngine::new()`]
/// 2. Wrap in an `Arc` and start with [`AuthEngine::run()`]
/// 3. The engine resyncs the roster, then runs timers and the push stream
///    until a shutdown signal or a fatal error
///
/// The individual operations (`full_resync`, `apply_push`,
/// `run_check_cycle`) are public and safe to call concurrently.
pub struct AuthEngine {
    /// Device state, owned by the engine
    registry: DeviceRegistry,

    /// Cloud roster for full resyncs
    roster: Box<dyn RosterSource>,

    /// Incremental roster pushes
    push_source: Box<dyn PushSource>,

    /// Router calls with token management
    router: RouterSession,

    /// Captive portal, shared with dispatch workers
    portal: Arc<dyn PortalAuthenticator>,

    config: EngineConfig,

    /// Reentrancy guard for check cycles
    check_in_flight: AtomicBool,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl AuthEngine {
    /// Create a new auth engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        roster: Box<dyn RosterSource>,
        push_source: Box<dyn PushSource>,
        router: Box<dyn RouterApi>,
        portal: Box<dyn PortalAuthenticator>,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            registry: DeviceRegistry::new(),
            roster,
            push_source,
            router: RouterSession::new(Arc::from(router)),
            portal: Arc::from(portal),
            config,
            check_in_flight: AtomicBool::new(false),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// The registry this engine maintains
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// The router session (and its token cache)
    pub fn router(&self) -> &RouterSession {
        &self.router
    }

    /// Run the engine until SIGINT or a fatal error
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine with a controlled shutdown signal
    ///
    /// With `None`, the engine waits for Ctrl-C like [`AuthEngine::run()`].
    pub async fn run_with_shutdown(
        self: Arc<Self>,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(self: Arc<Self>, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(EngineEvent::Started);

        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl-C: {}", e);
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        // Nothing to serve without an initial roster
        if let Err(e) = self.full_resync().await {
            error!("Initial roster sync failed: {}", e);
            self.emit_event(EngineEvent::Stopped {
                reason: format!("Initial roster sync failed: {}", e),
            });
            return Err(e);
        }

        let mut pushes = self.push_source.watch();

        let resync_every = self.config.resync_interval();
        let mut resync_timer = interval_at(Instant::now() + resync_every, resync_every);
        resync_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let check_every = self.config.check_interval();
        let mut check_timer = interval_at(Instant::now() + check_every, check_every);
        check_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cycles: JoinSet<Result<CycleOutcome>> = JoinSet::new();

        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break Ok(());
                }

                _ = resync_timer.tick() => {
                    if let Err(e) = self.full_resync().await
                        && e.is_fatal()
                    {
                        break Err(e);
                    }
                }

                _ = check_timer.tick() => {
                    let engine = Arc::clone(&self);
                    cycles.spawn(async move { engine.run_check_cycle().await });
                }

                Some(push) = pushes.next() => {
                    match self.apply_push(push).await {
                        Ok(_) => {}
                        Err(e) if e.is_fatal() => break Err(e),
                        Err(e) => error!("Failed to apply roster push: {}", e),
                    }
                }

                Some(joined) = cycles.join_next() => {
                    match joined {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) if e.is_fatal() => break Err(e),
                        Ok(Err(e)) => error!("Check cycle failed: {}", e),
                        Err(e) => error!("Check cycle task aborted: {}", e),
                    }
                }
            }
        };

        // In-flight cycles are bounded by the cycle deadline
        while let Some(joined) = cycles.join_next().await {
            if let Ok(Err(e)) = joined {
                warn!("Check cycle finished with error during shutdown: {}", e);
            }
        }

        let reason = match &result {
            Ok(()) => "Shutdown signal".to_string(),
            Err(e) => format!("Fatal error: {}", e),
        };
        info!("Engine stopped ({})", reason);
        self.emit_event(EngineEvent::Stopped { reason });

        result
    }

    /// Replace the registry with the complete cloud roster
    ///
    /// The roster is fetched first; the registry is cleared and repopulated
    /// inside one write transaction only after a successful fetch, so readers
    /// never observe an empty or partial registry and a failed fetch leaves it
    /// untouched.
    ///
    /// # Returns
    ///
    /// The number of devices stored
    pub async fn full_resync(&self) -> Result<usize> {
        let entries = match self.roster.fetch_roster().await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to fetch roster from {}: {}", self.roster.source_name(), e);
                self.emit_event(EngineEvent::ResyncFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        };

        let mut skipped = 0;
        let stored = {
            let mut txn = self.registry.write().await;
            txn.clear();

            for entry in &entries {
                for mac in &entry.macs {
                    if let Some(existing) = txn.get(mac)
                        && existing.name != entry.account
                    {
                        warn!(
                            "MAC {} listed by both {} and {}, keeping {}",
                            mac, existing.name, entry.account, entry.account
                        );
                    }

                    let device = Device::new(&entry.account, mac.clone(), &entry.password, entry.expired_at);
                    if !txn.upsert(device) {
                        skipped += 1;
                    }
                }
            }

            txn.len()
        };

        if skipped > 0 {
            debug!("Skipped {} already-expired roster device(s)", skipped);
        }
        info!(
            "Synced {} device(s) from {} roster account(s)",
            stored,
            entries.len()
        );
        self.emit_event(EngineEvent::ResyncCompleted {
            accounts: entries.len(),
            devices: stored,
        });

        Ok(stored)
    }

    /// Apply an incremental roster push
    ///
    /// 1. Every registered device of the account whose MAC is missing from
    ///    the push is deleted, then kicked at the router
    /// 2. If the push carries an expiry, every listed MAC is created or
    ///    refreshed with the new expiry (and password, when present)
    ///
    /// Kicks happen after the registry transaction is released. A failed
    /// kick is logged; only fatal errors are returned.
    pub async fn apply_push(&self, push: RosterPush) -> Result<PushOutcome> {
        debug!("Applying roster push: {:?}", push);
        let listed: HashSet<&MacAddress> = push.macs.iter().collect();

        let outcome = {
            let mut txn = self.registry.write().await;

            let revoked: Vec<MacAddress> = txn
                .scan_by_name(&push.account)
                .into_iter()
                .filter(|mac| !listed.contains(mac))
                .collect();
            for mac in &revoked {
                txn.delete(mac);
            }

            let mut refreshed = 0;
            if let Some(expired_at) = push.expired_at {
                for mac in &push.macs {
                    let device = match txn.get(mac) {
                        Some(existing) => {
                            let mut device = existing.clone();
                            device.name = push.account.clone();
                            device.expired_at = expired_at;
                            if let Some(password) = &push.password {
                                device.password = password.clone();
                            }
                            device
                        }
                        None => Device::new(
                            &push.account,
                            mac.clone(),
                            push.password.clone().unwrap_or_default(),
                            expired_at,
                        ),
                    };

                    if txn.upsert(device) {
                        refreshed += 1;
                    }
                }
            }

            PushOutcome { refreshed, revoked }
        };

        for mac in &outcome.revoked {
            info!("Kick user: {}, mac: {}", push.account, mac);
            match self.router.kick(mac).await {
                Ok(sessions) => {
                    self.emit_event(EngineEvent::DeviceKicked {
                        mac: mac.clone(),
                        sessions,
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Failed to kick {}: {}", mac, e),
            }
        }

        self.emit_event(EngineEvent::PushApplied {
            account: push.account.clone(),
            refreshed: outcome.refreshed,
            revoked: outcome.revoked.len(),
        });

        Ok(outcome)
    }

    /// Run one check cycle (reconcile, then dispatch) under the reentrancy guard
    ///
    /// # Returns
    ///
    /// - `Ok(CycleOutcome::Skipped)`: another cycle was in flight
    /// - `Ok(CycleOutcome::Completed { .. })`: the cycle ran to completion
    /// - `Err(Error)`: a router fetch failed, or the cycle hit its deadline
    pub async fn run_check_cycle(&self) -> Result<CycleOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.check_in_flight) else {
            warn!("Check cycle already in progress, skipping this run");
            self.emit_event(EngineEvent::CycleSkipped);
            return Ok(CycleOutcome::Skipped);
        };

        let deadline = self.config.cycle_deadline();
        match tokio::time::timeout(deadline, self.check_cycle()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Check cycle exceeded its {:?} deadline, abandoning it", deadline);
                Err(Error::timeout(format!("check cycle exceeded {:?}", deadline)))
            }
        }
    }

    async fn check_cycle(&self) -> Result<CycleOutcome> {
        let purged = self.registry.purge_expired().await;
        if purged > 0 {
            info!("Dropped {} expired device(s)", purged);
        }

        let reconcile = self.reconcile_state().await?;
        let dispatch = self.dispatch_pending().await;

        info!(
            "Finished checking auth status: {} online, {} authenticated, {} dispatched",
            reconcile.online, reconcile.authenticated, dispatch.dispatched
        );
        self.emit_event(EngineEvent::CycleCompleted {
            dispatched: dispatch.dispatched,
            authed: dispatch.authed,
        });

        Ok(CycleOutcome::Completed { reconcile, dispatch })
    }

    /// Reconcile every device's `online`, `auth` and `ip` against the router
    ///
    /// Router rows for MACs outside the registry are ignored. Identity,
    /// credential and expiry fields are never touched.
    pub async fn reconcile_state(&self) -> Result<ReconcileReport> {
        let online = self.router.online_devices().await?;
        let authenticated = self.router.authenticated_macs().await?;

        let mut report = ReconcileReport::default();
        {
            let mut txn = self.registry.write().await;
            txn.update_all(Device::reset_transient);

            for row in &online {
                if txn.update(&row.mac, |device| {
                    device.online = true;
                    device.ip = row.ip;
                }) {
                    report.online += 1;
                }
            }

            for mac in &authenticated {
                if txn.update(mac, |device| device.auth = true) {
                    report.authenticated += 1;
                }
            }
        }

        debug!(
            "Router reports {} online / {} authenticated, {} / {} in registry",
            online.len(),
            authenticated.len(),
            report.online,
            report.authenticated
        );
        self.emit_event(EngineEvent::StateReconciled {
            online: report.online,
            authenticated: report.authenticated,
        });

        Ok(report)
    }

    /// Dispatch the auth call for every online, unauthenticated device with an IP
    ///
    /// Calls run on a worker pool of `auth_concurrency` width and this method
    /// waits for all of them. A failed call never stops the others. Once every
    /// call has returned, each dispatched device is marked authenticated
    /// regardless of its call's outcome; the next cycle corrects the flag from
    /// the router's authenticated table.
    pub async fn dispatch_pending(&self) -> DispatchReport {
        let pending: Vec<PortalAuthRequest> = {
            let view = self.registry.read().await;
            view.scan_all()
                .filter(|device| device.needs_auth())
                .filter_map(PortalAuthRequest::for_device)
                .collect()
        };

        let mut report = DispatchReport {
            dispatched: pending.len(),
            ..DispatchReport::default()
        };
        if pending.is_empty() {
            return report;
        }

        let dispatched: Vec<MacAddress> = pending.iter().map(|request| request.mac.clone()).collect();

        let workers = Arc::new(Semaphore::new(self.config.auth_concurrency));
        let mut calls = JoinSet::new();
        for request in pending {
            let portal = Arc::clone(&self.portal);
            let workers = Arc::clone(&workers);
            calls.spawn(async move {
                let result = match workers.acquire_owned().await {
                    Ok(_permit) => portal.authenticate(&request).await,
                    Err(_) => Err(Error::portal("auth worker pool closed")),
                };
                (request, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((request, Ok(()))) => {
                    info!(
                        "Auth user: {}, mac: {}, ip: {}",
                        request.username, request.mac, request.ip
                    );
                    self.emit_event(EngineEvent::DeviceAuthed {
                        mac: request.mac,
                        ip: request.ip,
                    });
                }
                Ok((request, Err(e))) => {
                    warn!(
                        "Auth call to {} for {} failed: {}",
                        self.portal.portal_name(),
                        request.mac,
                        e
                    );
                    report.failed += 1;
                    self.emit_event(EngineEvent::AuthFailed {
                        mac: request.mac,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    error!("Auth worker aborted: {}", e);
                    report.failed += 1;
                }
            }
        }

        let mut txn = self.registry.write().await;
        for mac in &dispatched {
            if txn.update(mac, |device| device.auth = true) {
                report.authed += 1;
            }
        }

        report
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Send event, logging warning if channel is full (backpressure)
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Holds the check-cycle flag; released on drop, including on cancellation
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
