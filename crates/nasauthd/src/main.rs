// # nasauthd - NAS Auth Daemon
//
// The nasauthd daemon is a thin integration layer. It is responsible for:
// 1. Reading configuration from environment variables (and an optional .env file)
// 2. Initializing logging and the runtime
// 3. Wiring the roster, push, router and portal adapters into the engine
// 4. Running the engine until SIGTERM/SIGINT or a fatal error
//
// All reconciliation and dispatch logic lives in nasauth-core.
//
// ## Configuration
//
// ### Required
// - `WYJ_NAS_IDENTIFIER`: NAS identifier issued by the cloud service
// - `WYJ_NAS_ACCESS_KEY`: Access key paired with the identifier
// - `NAS_HTTP_ENDPOINT`: Router web UI base URL (e.g., http://192.168.1.1)
// - `NAS_HTTP_USERNAME`: Router web UI username
// - `NAS_HTTP_PASSWORD`: Router web UI password
//
// ### Optional
// - `EXECUTE_INTERVAL_MIN`: Minutes between check cycles (default 1)
// - `NASAUTH_RESYNC_INTERVAL_MIN`: Minutes between full roster resyncs (default 30)
// - `NASAUTH_ROSTER_URL`: Roster callback URL
// - `NASAUTH_PORTAL_URL`: Captive-portal auth URL
// - `NASAUTH_MQTT_HOST` / `NASAUTH_MQTT_PORT`: Push broker
// - `NASAUTH_TIMEZONE`: Timezone of roster timestamps (default Asia/Shanghai)
// - `NASAUTH_AUTH_CONCURRENCY`: Auth dispatch worker pool width (default 10)
// - `NASAUTH_CYCLE_DEADLINE_SECS`: Deadline of one check cycle (default 300)
// - `NASAUTH_HTTP_TIMEOUT_SECS`: Per-request HTTP timeout (default 30)
// - `NASAUTH_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export WYJ_NAS_IDENTIFIER=nas-0001
// export WYJ_NAS_ACCESS_KEY=...
// export NAS_HTTP_ENDPOINT=http://192.168.1.1
// export NAS_HTTP_USERNAME=admin
// export NAS_HTTP_PASSWORD=...
//
// nasauthd
// ```

use anyhow::{Context, Result};
use chrono_tz::Tz;
use nasauth_core::config::{
    AgentConfig, EngineConfig, PortalConfig, PushConfig, RosterConfig, RouterConfig,
};
use nasauth_core::engine::{AuthEngine, EngineEvent};
use nasauth_portal_webradius::WebRadiusPortal;
use nasauth_push_mqtt::MqttPushSource;
use nasauth_roster_cloud::CloudRosterSource;
use nasauth_router_ikuai::IkuaiRouter;
use std::env;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (including rejected credentials)
#[derive(Debug, Clone, Copy)]
enum NasAuthExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error
    RuntimeError = 2,
}

impl From<NasAuthExitCode> for ExitCode {
    fn from(code: NasAuthExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration
#[derive(Debug)]
struct Config {
    agent: AgentConfig,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|value| !value.is_empty())
                .with_context(|| format!("{} is required", key))
        };

        let mut roster = RosterConfig::new(
            required("WYJ_NAS_IDENTIFIER")?,
            required("WYJ_NAS_ACCESS_KEY")?,
        );
        if let Some(url) = lookup("NASAUTH_ROSTER_URL") {
            roster.url = url;
        }
        if let Some(tz) = lookup("NASAUTH_TIMEZONE") {
            roster.timezone = Tz::from_str(&tz)
                .map_err(|e| anyhow::anyhow!("NASAUTH_TIMEZONE '{}' is not valid: {}", tz, e))?;
        }

        let router = RouterConfig {
            endpoint: required("NAS_HTTP_ENDPOINT")?,
            username: required("NAS_HTTP_USERNAME")?,
            password: required("NAS_HTTP_PASSWORD")?,
        };

        let mut portal = PortalConfig::default();
        if let Some(url) = lookup("NASAUTH_PORTAL_URL") {
            portal.url = url;
        }

        let mut push = PushConfig::default();
        if let Some(host) = lookup("NASAUTH_MQTT_HOST") {
            push.host = host;
        }
        if let Some(port) = parse_var(&lookup, "NASAUTH_MQTT_PORT")? {
            push.port = port;
        }

        let mut engine = EngineConfig::default();
        if let Some(minutes) = parse_var::<u64>(&lookup, "EXECUTE_INTERVAL_MIN")? {
            engine.check_interval_secs = minutes.saturating_mul(60);
        }
        if let Some(minutes) = parse_var::<u64>(&lookup, "NASAUTH_RESYNC_INTERVAL_MIN")? {
            engine.resync_interval_secs = minutes.saturating_mul(60);
        }
        if let Some(width) = parse_var(&lookup, "NASAUTH_AUTH_CONCURRENCY")? {
            engine.auth_concurrency = width;
        }
        if let Some(secs) = parse_var(&lookup, "NASAUTH_CYCLE_DEADLINE_SECS")? {
            engine.cycle_deadline_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "NASAUTH_HTTP_TIMEOUT_SECS")? {
            engine.http_timeout_secs = secs;
        }

        Ok(Self {
            agent: AgentConfig {
                roster,
                router,
                portal,
                push,
                engine,
            },
            log_level: lookup("NASAUTH_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.agent.validate()?;

        let engine = &self.agent.engine;
        if engine.check_interval_secs > 24 * 3600 {
            anyhow::bail!(
                "EXECUTE_INTERVAL_MIN must be between 1 and 1440 minutes. Got: {}",
                engine.check_interval_secs / 60
            );
        }

        if engine.auth_concurrency > 256 {
            anyhow::bail!(
                "NASAUTH_AUTH_CONCURRENCY must be between 1 and 256. Got: {}",
                engine.auth_concurrency
            );
        }

        // Validate log level
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "NASAUTH_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

/// Parse an optional variable, failing on a present but malformed value
fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} '{}' is not valid: {}", key, raw, e)),
    }
}

/// Build the adapters and the engine
fn build_engine(agent: &AgentConfig) -> Result<(AuthEngine, mpsc::Receiver<EngineEvent>)> {
    let timeout = agent.engine.http_timeout();

    let roster = CloudRosterSource::new(&agent.roster, timeout)?;
    let push = MqttPushSource::new(&agent.push, &agent.roster)?;
    let router = IkuaiRouter::new(&agent.router, timeout)?;
    let portal = WebRadiusPortal::new(&agent.portal, timeout)?;

    info!("Roster: {}", agent.roster.url);
    info!("Router: {}", agent.router.endpoint);
    info!("Push topic: {} on {}:{}", push.topic(), agent.push.host, agent.push.port);

    let (engine, events) = AuthEngine::new(
        Box::new(roster),
        Box::new(push),
        Box::new(router),
        Box::new(portal),
        agent.engine.clone(),
    )?;
    Ok((engine, events))
}

fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return NasAuthExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return NasAuthExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return NasAuthExitCode::ConfigError.into();
    }

    info!("Starting nasauthd daemon");
    info!(
        "Check every {}s, resync every {}s, {} auth worker(s)",
        config.agent.engine.check_interval_secs,
        config.agent.engine.resync_interval_secs,
        config.agent.engine.auth_concurrency
    );

    let (engine, events) = match build_engine(&config.agent) {
        Ok(built) => built,
        Err(e) => {
            error!("Failed to initialize: {:#}", e);
            return NasAuthExitCode::ConfigError.into();
        }
    };

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return NasAuthExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(engine, events).await {
            error!("Daemon error: {:#}", e);
            NasAuthExitCode::RuntimeError
        } else {
            NasAuthExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the engine until a shutdown signal or a fatal error
async fn run_daemon(engine: AuthEngine, mut events: mpsc::Receiver<EngineEvent>) -> Result<()> {
    let engine = Arc::new(engine);

    let event_logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("Engine event: {:?}", event);
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let signal_watcher = tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(signal) => info!("Received shutdown signal: {}", signal),
            Err(e) => warn!("Signal handling unavailable, shutting down: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    let result = Arc::clone(&engine).run_with_shutdown(Some(shutdown_rx)).await;

    signal_watcher.abort();
    // The engine is the only event sender; dropping it ends the logger
    drop(engine);
    let _ = event_logger.await;

    result.context("engine stopped")?;
    info!("Shutting down daemon");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let received = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(received)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("WYJ_NAS_IDENTIFIER", "nas-0001"),
        ("WYJ_NAS_ACCESS_KEY", "key"),
        ("NAS_HTTP_ENDPOINT", "http://192.168.1.1"),
        ("NAS_HTTP_USERNAME", "admin"),
        ("NAS_HTTP_PASSWORD", "secret"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup_from(REQUIRED)).unwrap();
        config.validate().unwrap();

        assert_eq!(config.agent.engine.check_interval_secs, 60);
        assert_eq!(config.agent.engine.resync_interval_secs, 1800);
        assert_eq!(config.agent.roster.timezone, chrono_tz::Asia::Shanghai);
        assert_eq!(config.agent.push.topic_for("nas-0001"), "wyj_nas_events/nas-0001");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("EXECUTE_INTERVAL_MIN", "5"),
            ("NASAUTH_TIMEZONE", "UTC"),
            ("NASAUTH_AUTH_CONCURRENCY", "4"),
            ("NASAUTH_MQTT_PORT", "8883"),
        ]);

        let config = Config::from_lookup(lookup_from(&vars)).unwrap();
        config.validate().unwrap();

        assert_eq!(config.agent.engine.check_interval_secs, 300);
        assert_eq!(config.agent.engine.auth_concurrency, 4);
        assert_eq!(config.agent.roster.timezone, chrono_tz::UTC);
        assert_eq!(config.agent.push.port, 8883);
    }

    #[test]
    fn test_missing_required_variable() {
        let vars: Vec<_> = REQUIRED
            .iter()
            .copied()
            .filter(|(k, _)| *k != "NAS_HTTP_PASSWORD")
            .collect();

        let err = Config::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(err.to_string().contains("NAS_HTTP_PASSWORD"));
    }

    #[test]
    fn test_malformed_values_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("EXECUTE_INTERVAL_MIN", "soon"));
        assert!(Config::from_lookup(lookup_from(&vars)).is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("EXECUTE_INTERVAL_MIN", "0"));
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();
        assert!(config.validate().is_err());

        let mut vars = REQUIRED.to_vec();
        vars.push(("NASAUTH_LOG_LEVEL", "loud"));
        let config = Config::from_lookup(lookup_from(&vars)).unwrap();
        assert!(config.validate().is_err());
    }
}
