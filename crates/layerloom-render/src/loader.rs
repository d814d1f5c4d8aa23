//! Image loading module.
//! Fetches layer sources (files, URLs or in-memory blobs) and decodes them into
//! RGBA8 frame buffers on background tasks.

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use layerloom_core::frame::FrameBuffer;
use layerloom_core::{LayerloomError, LayerloomResult};

/// Where a layer image comes from.
#[derive(Debug, Clone)]
pub enum LayerSource {
    File(PathBuf),
    Url(reqwest::Url),
    /// A user-supplied image blob.
    Bytes { label: String, data: Arc<[u8]> },
}

impl LayerSource {
    /// `http://` and `https://` locations are URLs, anything else is a file path.
    pub fn from_location(location: &str) -> LayerloomResult<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = reqwest::Url::parse(location).map_err(|e| {
                LayerloomError::InvalidArgument(format!("invalid URL '{}': {}", location, e))
            })?;
            Ok(LayerSource::Url(url))
        } else {
            Ok(LayerSource::File(PathBuf::from(location)))
        }
    }

    pub fn bytes(label: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        LayerSource::Bytes {
            label: label.into(),
            data: data.into(),
        }
    }

    /// Human-readable identifier used in logs and as the layer's current source.
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LayerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSource::File(path) => write!(f, "{}", path.display()),
            LayerSource::Url(url) => write!(f, "{}", url),
            LayerSource::Bytes { label, .. } => write!(f, "{}", label),
        }
    }
}

/// Retrieves the raw encoded bytes of a source.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &LayerSource) -> LayerloomResult<Vec<u8>>;
}

/// Reads files from disk and URLs over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch(&self, source: &LayerSource) -> LayerloomResult<Vec<u8>> {
        match source {
            LayerSource::File(path) => tokio::fs::read(path).await.map_err(|e| {
                LayerloomError::asset(format!("failed to read '{}': {}", path.display(), e), path)
            }),
            LayerSource::Url(url) => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| {
                        LayerloomError::asset(format!("failed to fetch: {}", e), url.as_str())
                    })?;
                let body = response.bytes().await.map_err(|e| {
                    LayerloomError::asset(format!("failed to read body: {}", e), url.as_str())
                })?;
                Ok(body.to_vec())
            }
            LayerSource::Bytes { data, .. } => Ok(data.to_vec()),
        }
    }
}

/// Decode an encoded image (PNG, JPEG, GIF, ...) from raw bytes.
pub fn decode_image(data: &[u8]) -> LayerloomResult<FrameBuffer> {
    let img = image::load_from_memory(data)
        .map_err(|e| LayerloomError::asset(format!("failed to decode image: {}", e), "<memory>"))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(FrameBuffer {
        data: rgba.into_raw(),
        width,
        height,
    })
}

/// Result of one load, successful or not.
#[derive(Debug)]
pub struct LoadOutcome {
    pub slot: usize,
    pub generation: u64,
    pub source: String,
    pub result: LayerloomResult<FrameBuffer>,
}

/// A pending layer load. Resolves exactly once; dropping it cancels the work.
#[derive(Debug)]
pub struct LoadTask {
    slot: usize,
    generation: u64,
    source: String,
    handle: JoinHandle<LayerloomResult<FrameBuffer>>,
}

impl LoadTask {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Future for LoadTask {
    type Output = LoadOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.handle).poll(cx).map(|joined| {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(LayerloomError::load(this.slot, "cancelled")),
                Err(e) => Err(LayerloomError::load(this.slot, format!("loader panicked: {}", e))),
            };
            LoadOutcome {
                slot: this.slot,
                generation: this.generation,
                source: this.source.clone(),
                result,
            }
        })
    }
}

impl Drop for LoadTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawns fetch-and-decode tasks for layer slots.
#[derive(Clone)]
pub struct LayerLoader {
    fetcher: Arc<dyn SourceFetcher>,
    timeout: Duration,
}

impl LayerLoader {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start loading `source` for `slot`. Must be called inside a tokio runtime.
    ///
    /// Loads for different slots run independently and may finish in any order.
    pub fn load(&self, slot: usize, generation: u64, source: LayerSource) -> LoadTask {
        let label = source.label();
        let fetcher = Arc::clone(&self.fetcher);
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let work = async {
                let bytes = fetcher.fetch(&source).await?;
                tokio::task::spawn_blocking(move || decode_image(&bytes))
                    .await
                    .map_err(|e| LayerloomError::load(slot, format!("decoder panicked: {}", e)))?
            };
            match tokio::time::timeout(timeout, work).await {
                Ok(Ok(image)) => Ok(image),
                Ok(Err(e)) => Err(LayerloomError::load(slot, e.to_string())),
                Err(_) => Err(LayerloomError::LoadTimeout {
                    slot,
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        });

        LoadTask {
            slot,
            generation,
            source: label,
            handle,
        }
    }
}

impl fmt::Debug for LayerLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerLoader")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(color: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    struct NeverFetcher;

    #[async_trait]
    impl SourceFetcher for NeverFetcher {
        async fn fetch(&self, _source: &LayerSource) -> LayerloomResult<Vec<u8>> {
            std::future::pending().await
        }
    }

    #[test]
    fn test_location_classification() {
        assert!(matches!(
            LayerSource::from_location("https://cdn.example/anim0/light/0001.png").unwrap(),
            LayerSource::Url(_)
        ));
        assert!(matches!(
            LayerSource::from_location("anim0/light/0001.png").unwrap(),
            LayerSource::File(_)
        ));
        assert!(LayerSource::from_location("http://[bad").is_err());
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(decode_image(b"not an image").is_err());
    }

    #[tokio::test]
    async fn test_load_bytes_source() {
        let loader = LayerLoader::new(Arc::new(DefaultFetcher::new()), Duration::from_secs(5));
        let outcome = loader
            .load(3, 7, LayerSource::bytes("upload.png", png_bytes([9, 8, 7, 255])))
            .await;
        assert_eq!(outcome.slot, 3);
        assert_eq!(outcome.generation, 7);
        assert_eq!(outcome.source, "upload.png");
        let image = outcome.result.unwrap();
        assert_eq!((image.width, image.height), (2, 2));
        assert_eq!(image.get_pixel(1, 1), Some([9, 8, 7, 255]));
    }

    #[tokio::test]
    async fn test_missing_file_reports_slot() {
        let loader = LayerLoader::new(Arc::new(DefaultFetcher::new()), Duration::from_secs(5));
        let outcome = loader
            .load(1, 1, LayerSource::File("/nonexistent/0001.png".into()))
            .await;
        assert!(matches!(outcome.result, Err(LayerloomError::Load { slot: 1, .. })));
    }

    #[tokio::test]
    async fn test_stalled_fetch_times_out() {
        let loader = LayerLoader::new(Arc::new(NeverFetcher), Duration::from_millis(20));
        let outcome = loader.load(2, 1, LayerSource::File("x.png".into())).await;
        assert!(matches!(
            outcome.result,
            Err(LayerloomError::LoadTimeout { slot: 2, timeout_ms: 20 })
        ));
    }
}
