//! # tripup-core
//!
//! Core types, traits, and abstractions for the TripUp asset sync pipeline.
//!
//! This crate provides the domain models, the error type, the contracts of
//! the external systems the pipeline consumes (database, keychain, cloud
//! storage, REST API, photo library, disk, reachability), and the shared
//! primitives (`AtomicVar`, `EventBus`) the other crates build on.

pub mod atomic;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use atomic::AtomicVar;
pub use error::{Error, Result};
pub use events::{AssetEvent, EventBus, EventEnvelope};
pub use models::*;
pub use traits::*;
