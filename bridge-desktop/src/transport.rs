//! Transport Implementation using Reqwest
//!
//! Streams response bodies chunk by chunk and reports them as
//! [`TransferEvent`]s. Exactly one terminal event is emitted per transfer,
//! including after cancellation, so consumers can treat the terminal event
//! as the attempt's acknowledgement.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    transport::{
        TransferDestination, TransferEvent, TransferHandle, TransferRequest, Transport,
        TransportFailure,
    },
};
use futures_util::StreamExt;
use reqwest::Client;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reqwest-based transport implementation
///
/// Provides streaming downloads with:
/// - Connection pooling via reqwest
/// - TLS support by default
/// - Failure classification (timeouts and 5xx/429 are retryable)
/// - Cooperative cancellation between chunks
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a new transport with default configuration
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build client: {e}")))?;

        Ok(Self { client })
    }

    /// Create a new transport with a custom client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn classify_send_error(e: reqwest::Error) -> TransportFailure {
        if e.is_timeout() {
            TransportFailure::retryable("Request timed out")
        } else if e.is_connect() {
            TransportFailure::retryable(format!("Connection failed: {e}"))
        } else {
            TransportFailure::fatal(e.to_string())
        }
    }

    fn classify_status(status: u16) -> Option<TransportFailure> {
        if status >= 500 || status == 429 {
            Some(TransportFailure::retryable(format!("HTTP {status} error")))
        } else if status >= 400 {
            Some(TransportFailure::fatal(format!("HTTP {status} error")))
        } else {
            None
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn start_transfer(
        &self,
        request: TransferRequest,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<TransferHandle> {
        // Malformed URLs fail synchronously; everything else is reported
        // through the event channel.
        reqwest::Url::parse(&request.url)
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid URL: {e}")))?;

        let token = CancellationToken::new();
        let client = self.client.clone();
        let task_token = token.clone();
        tokio::spawn(async move {
            match drive_transfer(client, request, &events, &task_token).await {
                Ok(()) => {
                    events.send(TransferEvent::Completed).ok();
                }
                Err(failure) => {
                    debug!(error = %failure, retryable = failure.retryable, "Transfer failed");
                    events.send(TransferEvent::Failed(failure)).ok();
                }
            }
        });

        Ok(TransferHandle::new(token))
    }
}

async fn drive_transfer(
    client: Client,
    request: TransferRequest,
    events: &mpsc::UnboundedSender<TransferEvent>,
    token: &CancellationToken,
) -> std::result::Result<(), TransportFailure> {
    let mut builder = client.get(&request.url);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if let Some(timeout) = request.timeout {
        builder = builder.timeout(timeout);
    }

    let response = tokio::select! {
        _ = token.cancelled() => return Err(TransportFailure::fatal("Transfer cancelled")),
        result = builder.send() => result.map_err(ReqwestTransport::classify_send_error)?,
    };

    let status = response.status().as_u16();
    if let Some(failure) = ReqwestTransport::classify_status(status) {
        return Err(failure);
    }

    let headers: HashMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
        .collect();
    let expected = response.content_length();
    events
        .send(TransferEvent::ResponseReceived { status, headers })
        .ok();

    let mut stream = response.bytes_stream();

    match request.destination {
        TransferDestination::InMemory => loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => {
                    return Err(TransportFailure::fatal("Transfer cancelled"));
                }
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => {
                    events.send(TransferEvent::BytesReceived(chunk)).ok();
                }
                Some(Err(e)) => {
                    return Err(TransportFailure::retryable(format!("Stream error: {e}")));
                }
                None => return Ok(()),
            }
        },
        TransferDestination::OnDisk(path) => {
            let result = stream_to_file(&mut stream, &path, expected, events, token).await;
            if result.is_err() {
                // Leave no partial file behind.
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!(path = ?path, error = %e, "Partial file cleanup skipped");
                }
            }
            result
        }
    }
}

async fn stream_to_file(
    stream: &mut (impl futures_util::Stream<Item = reqwest::Result<bytes::Bytes>> + Unpin),
    path: &Path,
    expected: Option<u64>,
    events: &mpsc::UnboundedSender<TransferEvent>,
    token: &CancellationToken,
) -> std::result::Result<(), TransportFailure> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TransportFailure::fatal(format!("Failed to create directory: {e}")))?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| TransportFailure::fatal(format!("Failed to create file: {e}")))?;

    let mut total = 0u64;
    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => {
                return Err(TransportFailure::fatal("Transfer cancelled"));
            }
            chunk = stream.next() => chunk,
        };
        match chunk {
            Some(Ok(chunk)) => {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| TransportFailure::fatal(format!("Write failed: {e}")))?;
                total += chunk.len() as u64;
                events
                    .send(TransferEvent::BytesWritten { total, expected })
                    .ok();
            }
            Some(Err(e)) => {
                warn!(error = %e, "Body stream interrupted");
                return Err(TransportFailure::retryable(format!("Stream error: {e}")));
            }
            None => break,
        }
    }

    file.flush()
        .await
        .map_err(|e| TransportFailure::fatal(format!("Flush failed: {e}")))?;
    events
        .send(TransferEvent::FileReady(path.to_path_buf()))
        .ok();
    Ok(())
}
