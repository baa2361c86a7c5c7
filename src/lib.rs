//! Mount control daemon core
//!
//! Sits between an RPC surface used by observatory automation clients and an
//! HTTP-based telescope mount controller. Hides polling, timing and
//! safety-limit logic behind a small set of atomic, mutually exclusive
//! commands and reports a normalized mount state regardless of the
//! controller's own status format.
//!
//! The RPC transport, config file discovery and the astronomical
//! coordinate-transform implementation are external collaborators: the host
//! process dispatches calls to [`Mount`]'s methods and supplies a
//! [`SkyModel`].

mod client;
mod config;
mod error;
mod mount;
mod point;
mod pointing;
mod serializer;
mod sky;
mod status;

pub use client::{Controller, PwiClient};
pub use config::{Config, ParkPosition};
pub use error::{CommandResult, ControllerError};
pub use mount::{Mount, PathPoint, StatusReport};
pub use pointing::{validate_pointing, wrap_ha_degrees};
pub use serializer::{CommandSerializer, CommandSlot};
pub use sky::{Site, SkyModel};
pub use status::{classify, MountState, StatusSnapshot};
