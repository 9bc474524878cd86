//! # Core Loader Module
//!
//! Download coordination for remote resources:
//! - Canonical [`key::ResourceKey`] identity so equivalent URLs coalesce
//! - A single-flight registry owned by one [`coordinator::DownloadCoordinator`] task
//! - Observer fan-out with opaque detach tokens
//! - Transparent retry with exponential backoff
//! - Disk pre-check so cached payloads never touch the network
//!
//! The coordinator is transport- and decoder-agnostic; it moves bytes and
//! files. Decoding and policy decisions live in `core-service`.

pub mod coordinator;
pub mod error;
pub mod key;
pub mod observer;
pub mod state;

pub use coordinator::{DownloadCoordinator, LoadSpec};
pub use error::{LoadError, Result};
pub use key::ResourceKey;
pub use observer::{LoadEvent, LoadOutcome, ObserverHandle, ObserverId};
pub use state::EntryState;
