//! Collaborator traits for the NAS auth agent
//!
//! This module defines the abstract interfaces that all adapters must follow.
//!
//! - [`RosterSource`]: Fetch the authoritative cloud roster
//! - [`PushSource`]: Stream incremental roster pushes
//! - [`RouterApi`]: Query and control the router's web API
//! - [`PortalAuthenticator`]: Drive the captive-portal auth call

pub mod roster_source;
pub mod push_source;
pub mod router_api;
pub mod portal;

pub use roster_source::{RosterSource, RosterEntry};
pub use push_source::{PushSource, RosterPush};
pub use router_api::{RouterApi, OnlineDevice, SessionToken};
pub use portal::{PortalAuthenticator, PortalAuthRequest};
