//! End-to-end service tests over a scripted transport and a real temp
//! directory, exercising fetch policies, decoding, and cache population.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bridge_desktop::{ImageCodecDecoder, TokioFileSystem};
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::transport::{
    TransferEvent, TransferHandle, TransferRequest, Transport, TransportFailure,
};
use core_loader::LoadError;
use core_runtime::config::LoaderConfig;
use core_runtime::events::EventBus;
use core_service::{
    FetchPolicy, LoadOptions, LoadingState, ResourceDependencies, ResourceService,
};
use core_store::{create_pool, DatabaseConfig, RecordStore, SqliteRecordStore};

/// Transport that serves scripted payloads and counts calls.
struct FakeTransport {
    script: Mutex<VecDeque<Result<Bytes, TransportFailure>>>,
    calls: AtomicUsize,
}

impl FakeTransport {
    fn new(script: Vec<Result<Bytes, TransportFailure>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start_transfer(
        &self,
        _request: TransferRequest,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> BridgeResult<TransferHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportFailure::fatal("script exhausted")));

        tokio::spawn(async move {
            match behavior {
                Ok(payload) => {
                    let mut headers = HashMap::new();
                    headers.insert("content-length".to_string(), payload.len().to_string());
                    events
                        .send(TransferEvent::ResponseReceived {
                            status: 200,
                            headers,
                        })
                        .ok();
                    events.send(TransferEvent::BytesReceived(payload)).ok();
                    events.send(TransferEvent::Completed).ok();
                }
                Err(failure) => {
                    events.send(TransferEvent::Failed(failure)).ok();
                }
            }
        });

        Ok(TransferHandle::new(CancellationToken::new()))
    }
}

struct Harness {
    service: ResourceService,
    transport: Arc<FakeTransport>,
    _dir: tempfile::TempDir,
}

async fn harness(script: Vec<Result<Bytes, TransportFailure>>) -> Harness {
    harness_with_config(script, LoaderConfig::default()).await
}

async fn harness_with_config(
    script: Vec<Result<Bytes, TransportFailure>>,
    config: LoaderConfig,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(TokioFileSystem::with_cache_directory(
        dir.path().to_path_buf(),
    ));
    let pool = create_pool(DatabaseConfig::in_memory()).await.unwrap();
    let records = Arc::new(SqliteRecordStore::new(
        pool,
        fs.clone(),
        dir.path().join("store"),
    ));
    records.initialize().await.unwrap();

    let transport = FakeTransport::new(script);
    let service = ResourceService::new(ResourceDependencies {
        transport: transport.clone(),
        records,
        fs,
        decoder: Arc::new(ImageCodecDecoder::new()),
        event_bus: EventBus::default(),
        config,
    })
    .unwrap();

    Harness {
        service,
        transport,
        _dir: dir,
    }
}

fn png_bytes() -> Bytes {
    let image = image::RgbaImage::from_pixel(8, 6, image::Rgba([1, 2, 3, 255]));
    let mut buffer = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .unwrap();
    Bytes::from(buffer.into_inner())
}

#[tokio::test]
async fn test_load_reaches_success_with_payload() {
    let payload = Bytes::from_static(b"payload-bytes");
    let h = harness(vec![Ok(payload.clone())]).await;

    let mut request = h
        .service
        .load("https://example.com/a.bin", LoadOptions::new())
        .await
        .unwrap();

    let LoadingState::Success(resource) = request.wait().await else {
        panic!("expected success");
    };
    assert_eq!(resource.bytes.as_deref(), Some(payload.as_ref()));
    assert!(!resource.from_cache);
    assert!(resource.decoded.is_none());
}

#[tokio::test]
async fn test_second_load_hits_memory_store() {
    let payload = Bytes::from_static(b"cache-me");
    let h = harness(vec![Ok(payload.clone())]).await;

    let mut first = h
        .service
        .load("https://example.com/x.bin", LoadOptions::new())
        .await
        .unwrap();
    assert!(matches!(first.wait().await, LoadingState::Success(_)));

    let second = h
        .service
        .load("https://example.com/x.bin", LoadOptions::new())
        .await
        .unwrap();
    let LoadingState::Success(resource) = second.current() else {
        panic!("expected an immediately-completed request");
    };
    assert!(resource.from_cache);
    assert_eq!(resource.bytes.as_deref(), Some(payload.as_ref()));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_decode_produces_frames() {
    let h = harness(vec![Ok(png_bytes())]).await;

    let mut request = h
        .service
        .load(
            "https://example.com/img.png",
            LoadOptions::new().decode(true).max_pixel_size(4),
        )
        .await
        .unwrap();

    let LoadingState::Success(resource) = request.wait().await else {
        panic!("expected success");
    };
    let decoded = resource.decoded.as_ref().expect("decoded resource");
    assert_eq!(decoded.frame_count(), 1);
    let size = decoded.frame_size(0).unwrap();
    assert_eq!((size.width, size.height), (8, 6));

    // Rendering honors the pixel cap while keeping the aspect ratio.
    let frame = resource.render_frame(0).expect("rendered frame");
    assert_eq!((frame.width, frame.height), (4, 3));
}

#[tokio::test]
async fn test_undecodable_payload_fails_request() {
    let h = harness(vec![Ok(Bytes::from_static(b"not an image"))]).await;

    let mut request = h
        .service
        .load(
            "https://example.com/broken.png",
            LoadOptions::new().decode(true),
        )
        .await
        .unwrap();

    let LoadingState::Failure(error) = request.wait().await else {
        panic!("expected failure");
    };
    assert!(matches!(error, LoadError::Decode(_)));
}

#[tokio::test]
async fn test_dont_load_policy_reports_not_cached() {
    let h = harness(vec![]).await;

    let mut request = h
        .service
        .load(
            "https://example.com/cold.bin",
            LoadOptions::new().with_policy(FetchPolicy::ReturnStoreDontLoad),
        )
        .await
        .unwrap();

    let LoadingState::Failure(error) = request.wait().await else {
        panic!("expected failure");
    };
    assert!(matches!(error, LoadError::NotCached));
    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn test_dont_load_policy_serves_persisted_payload() {
    let payload = Bytes::from_static(b"persisted");
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(TokioFileSystem::with_cache_directory(
        dir.path().to_path_buf(),
    ));
    let pool = create_pool(DatabaseConfig::in_memory()).await.unwrap();
    let records = Arc::new(SqliteRecordStore::new(
        pool,
        fs.clone(),
        dir.path().join("store"),
    ));
    records.initialize().await.unwrap();

    let build = |transport: Arc<FakeTransport>| {
        ResourceService::new(ResourceDependencies {
            transport,
            records: records.clone(),
            fs: fs.clone(),
            decoder: Arc::new(ImageCodecDecoder::new()),
            event_bus: EventBus::default(),
            config: LoaderConfig::default(),
        })
        .unwrap()
    };

    let warm_service = build(FakeTransport::new(vec![Ok(payload.clone())]));
    let mut first = warm_service
        .load("https://example.com/warm.bin", LoadOptions::new())
        .await
        .unwrap();
    assert!(matches!(first.wait().await, LoadingState::Success(_)));

    // A fresh service has a cold memory tier; only the disk record answers.
    let offline = FakeTransport::new(vec![]);
    let cold_service = build(offline.clone());
    let mut request = cold_service
        .load(
            "https://example.com/warm.bin",
            LoadOptions::new().with_policy(FetchPolicy::ReturnStoreDontLoad),
        )
        .await
        .unwrap();
    let LoadingState::Success(resource) = request.wait().await else {
        panic!("expected success from store");
    };
    assert!(resource.from_cache);
    assert_eq!(resource.bytes.as_deref(), Some(payload.as_ref()));
    assert_eq!(offline.calls(), 0);
}

#[tokio::test]
async fn test_ignore_cache_always_downloads() {
    let payload = Bytes::from_static(b"fresh");
    let h = harness(vec![Ok(payload.clone()), Ok(payload.clone())]).await;

    let mut first = h
        .service
        .load("https://example.com/refetch.bin", LoadOptions::new())
        .await
        .unwrap();
    assert!(matches!(first.wait().await, LoadingState::Success(_)));

    let mut second = h
        .service
        .load(
            "https://example.com/refetch.bin",
            LoadOptions::new().with_policy(FetchPolicy::IgnoreCache {
                download_delay: None,
            }),
        )
        .await
        .unwrap();
    let LoadingState::Success(resource) = second.wait().await else {
        panic!("expected success");
    };
    assert!(!resource.from_cache);
    assert_eq!(h.transport.calls(), 2);
}

#[tokio::test]
async fn test_detach_during_download_delay_avoids_network() {
    let h = harness(vec![Ok(Bytes::from_static(b"never-fetched"))]).await;

    let request = h
        .service
        .load(
            "https://example.com/scrolled-past.bin",
            LoadOptions::new().with_policy(FetchPolicy::ReturnStoreElseLoad {
                download_delay: Some(Duration::from_millis(100)),
            }),
        )
        .await
        .unwrap();

    request.detach();
    tokio::time::sleep(Duration::from_millis(250)).await;

    assert_eq!(h.transport.calls(), 0);
}

#[tokio::test]
async fn test_second_store_lookup_after_delay() {
    let payload = Bytes::from_static(b"shared-between-requests");
    let h = harness(vec![Ok(payload.clone())]).await;
    let url = "https://example.com/both.bin";

    // The delayed request parks while the immediate one fetches.
    let mut delayed = h
        .service
        .load(
            url,
            LoadOptions::new().with_policy(FetchPolicy::ReturnStoreElseLoad {
                download_delay: Some(Duration::from_millis(150)),
            }),
        )
        .await
        .unwrap();
    let mut immediate = h.service.load(url, LoadOptions::new()).await.unwrap();

    assert!(matches!(immediate.wait().await, LoadingState::Success(_)));
    // The delayed request is served by the shared entry or by the second
    // store lookup; either way the network is hit exactly once.
    let LoadingState::Success(resource) = delayed.wait().await else {
        panic!("expected delayed request to succeed");
    };
    assert_eq!(resource.bytes.as_deref(), Some(payload.as_ref()));
    assert_eq!(h.transport.calls(), 1);
}

#[tokio::test]
async fn test_transport_failure_surfaces_as_failure_state() {
    let h = harness(vec![Err(TransportFailure::fatal("HTTP 404 error"))]).await;

    let mut request = h
        .service
        .load("https://example.com/missing.bin", LoadOptions::new())
        .await
        .unwrap();

    let LoadingState::Failure(error) = request.wait().await else {
        panic!("expected failure");
    };
    assert!(matches!(error, LoadError::Transport { retryable: false, .. }));
}

#[tokio::test]
async fn test_remove_cached_forgets_key() {
    let payload = Bytes::from_static(b"short-lived");
    let h = harness(vec![Ok(payload.clone())]).await;
    let url = "https://example.com/forget-me.bin";

    let mut request = h.service.load(url, LoadOptions::new()).await.unwrap();
    assert!(matches!(request.wait().await, LoadingState::Success(_)));

    h.service.remove_cached(url).await.unwrap();

    let mut request = h
        .service
        .load(
            url,
            LoadOptions::new().with_policy(FetchPolicy::ReturnStoreDontLoad),
        )
        .await
        .unwrap();
    assert!(matches!(
        request.wait().await,
        LoadingState::Failure(LoadError::NotCached)
    ));
}

#[tokio::test]
async fn test_invalid_config_rejected_at_construction() {
    let dir = tempfile::tempdir().unwrap();
    let fs = Arc::new(TokioFileSystem::with_cache_directory(
        dir.path().to_path_buf(),
    ));
    let pool = create_pool(DatabaseConfig::in_memory()).await.unwrap();
    let records = Arc::new(SqliteRecordStore::new(
        pool,
        fs.clone(),
        dir.path().join("store"),
    ));
    records.initialize().await.unwrap();

    let mut config = LoaderConfig::default();
    config.memory_cache_max_bytes = 0;

    let result = ResourceService::new(ResourceDependencies {
        transport: FakeTransport::new(vec![]),
        records,
        fs,
        decoder: Arc::new(ImageCodecDecoder::new()),
        event_bus: EventBus::default(),
        config,
    });
    assert!(result.is_err());
}
