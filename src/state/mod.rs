//! Shared server state: the replica registry, subscriber handles, and the
//! service container sessions are constructed around.

mod core;
pub mod registry;
pub mod subscriber;

pub use self::core::Core;
pub use registry::{Registry, RegistryError};
pub use subscriber::{Delivery, SessionId, StateUpdate, Subscriber};
