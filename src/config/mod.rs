//! Configuration
//!
//! [`AppConfig`] is loaded once at startup by [`loader`]. The only part that
//! changes at runtime is the ICE configuration, held in [`IceConfigStore`].

pub mod loader;
mod schema;
mod store;

pub use schema::*;
pub use store::{IceConfigChange, IceConfigStore};
