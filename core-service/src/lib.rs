//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (transport,
//! filesystem, decoder) into the loading core. Desktop apps typically enable
//! the `desktop-shims` feature (which depends on `bridge-desktop`) and call
//! [`bootstrap_desktop`]; other hosts construct [`ResourceService`] from
//! their own bridge implementations.

pub mod error;
pub mod options;
pub mod service;

pub use error::{CoreError, Result};
pub use options::{FetchPolicy, LoadOptions, LoadedResource, LoadingState};
pub use service::{ResourceDependencies, ResourceRequest, ResourceService};

#[cfg(feature = "desktop-shims")]
pub use shims::bootstrap_desktop;

#[cfg(feature = "desktop-shims")]
mod shims {
    use std::sync::Arc;

    use bridge_desktop::{ImageCodecDecoder, ReqwestTransport, TokioFileSystem};
    use bridge_traits::storage::FileSystemAccess;
    use core_runtime::config::LoaderConfig;
    use core_runtime::events::EventBus;
    use core_store::{create_pool, DatabaseConfig, RecordStore, SqliteRecordStore};

    use crate::error::Result;
    use crate::service::{ResourceDependencies, ResourceService};

    /// Bootstrap a [`ResourceService`] with the desktop bridges: reqwest
    /// transport, tokio filesystem, image decoder, and a SQLite record store
    /// in the platform cache directory.
    pub async fn bootstrap_desktop(config: LoaderConfig) -> Result<ResourceService> {
        let fs = Arc::new(TokioFileSystem::new());
        let cache_dir = fs.get_cache_directory().await?;

        let pool = create_pool(DatabaseConfig::new(cache_dir.join("records.db"))).await?;
        let records = Arc::new(SqliteRecordStore::new(
            pool,
            fs.clone(),
            cache_dir.join("store"),
        ));
        records.initialize().await?;

        let transport = Arc::new(ReqwestTransport::new()?);

        ResourceService::new(ResourceDependencies {
            transport,
            records,
            fs,
            decoder: Arc::new(ImageCodecDecoder::new()),
            event_bus: EventBus::default(),
            config,
        })
    }
}
