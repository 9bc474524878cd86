//! # Host Bridge Traits
//!
//! Capability traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the loading core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that must be implemented differently per platform.
//!
//! ## Traits
//!
//! - [`Transport`](transport::Transport) - Task-based downloads with byte-level
//!   progress events and cancellation
//! - [`Decoder`](decoder::Decoder) - Opaque resource decoding (frames, sizes,
//!   orientations, durations)
//! - [`FileSystemAccess`](storage::FileSystemAccess) - File I/O for the disk cache
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type.
//! Platform implementations should convert platform-specific errors to
//! `BridgeError` and provide actionable messages.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` bounds to support safe concurrent
//! usage across async tasks.

pub mod decoder;
pub mod error;
pub mod storage;
pub mod transport;

pub use error::BridgeError;

// Re-export commonly used types
pub use decoder::{
    ContainerType, DecodeSource, DecodedResource, Decoder, FrameOrientation, FrameSize, RawImage,
};
pub use storage::{FileMetadata, FileSystemAccess};
pub use transport::{
    TransferDestination, TransferEvent, TransferHandle, TransferRequest, Transport,
    TransportFailure,
};
