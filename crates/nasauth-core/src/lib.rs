// # nasauth-core
//
// Core library for the NAS device authentication agent.
//
// ## Architecture Overview
//
// The agent keeps an in-memory registry of subscribed devices and makes sure
// every one of them that is online at the router is authenticated at the
// captive portal:
// - **RosterSource / PushSource**: Traits for the authoritative cloud roster
//   and its incremental push channel
// - **RouterApi**: Trait for the router's web API (online table,
//   authenticated table, kick)
// - **PortalAuthenticator**: Trait for the captive-portal auth call
// - **DeviceRegistry**: MAC-keyed device table with per-record expiry and
//   multi-record transactions
// - **RouterSession**: Router calls over a cached session token with bounded
//   re-login
// - **AuthEngine**: Core engine that runs resyncs, pushes and check cycles
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from the HTTP/MQTT adapters
// 2. **Transactional Registry**: Every multi-record change happens in one transaction
// 3. **Library-First**: All core functionality can be used as a library
// 4. **Bounded Work**: Fixed-width auth dispatch, one re-login per call, a deadline per cycle

pub mod traits;
pub mod device;
pub mod engine;
pub mod registry;
pub mod session;
pub mod config;
pub mod error;

// Re-export core types for convenience
pub use traits::{PortalAuthenticator, PushSource, RosterSource, RouterApi};
pub use device::{Device, MacAddress};
pub use engine::{AuthEngine, CycleOutcome, EngineEvent};
pub use registry::DeviceRegistry;
pub use session::{RouterSession, SessionTokenCache};
pub use config::{AgentConfig, EngineConfig, PortalConfig, PushConfig, RosterConfig, RouterConfig};
pub use error::{Error, Result};
