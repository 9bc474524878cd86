//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the bridge traits
//! using desktop-appropriate libraries:
//! - `Transport` using `reqwest` with streaming bodies
//! - `FileSystemAccess` using `tokio::fs`
//! - `Decoder` using the `image` crate
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ImageCodecDecoder, ReqwestTransport, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = ReqwestTransport::new().unwrap();
//!     let fs = TokioFileSystem::new();
//!     let decoder = ImageCodecDecoder::new();
//!
//!     // Hand these to the service facade
//! }
//! ```

mod decoder;
mod filesystem;
mod transport;

pub use decoder::ImageCodecDecoder;
pub use filesystem::TokioFileSystem;
pub use transport::ReqwestTransport;
