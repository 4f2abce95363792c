//! Image resources that decode their source asynchronously
//!
//! Assigning a source starts a decode on the blocking pool. When it completes
//! the resource fires its one-shot `load` listeners, or its `error` listeners
//! if the source could not be decoded.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{ImageDataError, RawImageData};

type LoadListener = Box<dyn FnOnce(&ImageResource) + Send>;
type ErrorListener = Box<dyn FnOnce(&ImageResource, &ImageDataError) + Send>;

/// A displayable image whose pixels come from an encoded `source` string
#[derive(Clone)]
pub struct ImageResource {
    inner: Arc<ImageInner>,
}

struct ImageInner {
    name: String,
    state: Mutex<ImageState>,
}

#[derive(Default)]
struct ImageState {
    source: Option<String>,
    pixels: Option<Arc<RawImageData>>,
    /// Bumped on every source assignment; stale decodes are discarded
    generation: u64,
    on_load: Vec<LoadListener>,
    on_error: Vec<ErrorListener>,
}

impl std::fmt::Debug for ImageResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ImageResource")
            .field("name", &self.inner.name)
            .field("has_source", &state.source.is_some())
            .field("complete", &state.pixels.is_some())
            .finish()
    }
}

impl ImageResource {
    /// Create an empty image
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(ImageInner {
                name: name.to_string(),
                state: Mutex::new(ImageState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The currently assigned source, if any
    pub fn source(&self) -> Option<String> {
        self.inner.state.lock().source.clone()
    }

    /// Decoded pixels, available once `load` has fired
    pub fn pixels(&self) -> Option<Arc<RawImageData>> {
        self.inner.state.lock().pixels.clone()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.pixels().map(|p| (p.width, p.height))
    }

    /// True once the current source has been decoded
    pub fn is_complete(&self) -> bool {
        self.inner.state.lock().pixels.is_some()
    }

    /// Register a listener fired once, on the next successful decode
    pub fn once_load<F>(&self, listener: F)
    where
        F: FnOnce(&ImageResource) + Send + 'static,
    {
        self.inner.state.lock().on_load.push(Box::new(listener));
    }

    /// Register a listener fired once, on the next failed decode
    pub fn once_error<F>(&self, listener: F)
    where
        F: FnOnce(&ImageResource, &ImageDataError) + Send + 'static,
    {
        self.inner.state.lock().on_error.push(Box::new(listener));
    }

    /// Assign a new source and start decoding it
    ///
    /// Runs on the current Tokio runtime when there is one, otherwise on a
    /// short-lived thread.
    pub fn set_source(&self, source: impl Into<String>) {
        let source = source.into();
        let generation = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.source = Some(source.clone());
            state.pixels = None;
            state.generation
        };

        let image = self.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let decoded =
                        tokio::task::spawn_blocking(move || RawImageData::from_data_url(&source))
                            .await;
                    match decoded {
                        Ok(result) => image.settle(generation, result),
                        Err(e) => debug!(image = %image.name(), "decode task aborted: {}", e),
                    }
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    let result = RawImageData::from_data_url(&source);
                    image.settle(generation, result);
                });
            }
        }
    }

    /// Publish a decode result and fire the matching listeners
    ///
    /// Both listener lists are cleared whatever the outcome, so a later
    /// source assignment never reaches listeners bound for this one.
    fn settle(&self, generation: u64, result: Result<RawImageData, ImageDataError>) {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            debug!(image = %self.inner.name, "discarding superseded decode");
            return;
        }

        let on_load = std::mem::take(&mut state.on_load);
        let on_error = std::mem::take(&mut state.on_error);

        match result {
            Ok(pixels) => {
                debug!(
                    image = %self.inner.name,
                    width = pixels.width,
                    height = pixels.height,
                    "image loaded"
                );
                state.pixels = Some(Arc::new(pixels));
                drop(state);
                for listener in on_load {
                    listener(self);
                }
            }
            Err(e) => {
                debug!(image = %self.inner.name, "image failed to decode: {}", e);
                drop(state);
                for listener in on_error {
                    listener(self, &e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn pixel_url() -> String {
        RawImageData::new(1, 1, vec![9, 8, 7, 255])
            .unwrap()
            .to_data_url()
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_fires_once_after_decode() {
        let image = ImageResource::new("search");
        let (tx, rx) = oneshot::channel();
        image.once_load(move |img| {
            let _ = tx.send(img.dimensions());
        });

        assert!(!image.is_complete());
        image.set_source(pixel_url());

        let dims = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dims, Some((1, 1)));
        assert!(image.is_complete());
        assert_eq!(image.source(), Some(pixel_url()));
    }

    #[tokio::test]
    async fn test_error_fires_for_bad_source() {
        let image = ImageResource::new("area");
        let (tx, rx) = oneshot::channel();
        image.once_load(|_| panic!("must not load"));
        image.once_error(move |_, err| {
            let _ = tx.send(err.to_string());
        });

        image.set_source("data:text/plain,hello");

        let message = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(message.contains("data URL"));
        assert!(!image.is_complete());
    }

    #[test]
    fn test_decodes_without_runtime() {
        let image = ImageResource::new("search");
        let (tx, rx) = std::sync::mpsc::channel();
        image.once_load(move |_| {
            let _ = tx.send(());
        });

        image.set_source(pixel_url());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn test_settle_clears_unfired_listeners() {
        let image = ImageResource::new("search");
        image.once_load(|_| {});
        image.once_error(|_, _| panic!("listener outlived its decode"));

        let pixels = RawImageData::new(1, 1, vec![0, 0, 0, 255]).unwrap();
        image.settle(0, Ok(pixels));

        let state = image.inner.state.lock();
        assert!(state.on_load.is_empty());
        assert!(state.on_error.is_empty());
        drop(state);

        // A failing decode afterwards has nobody left to notify
        image.settle(0, Err(ImageDataError::InvalidDataUrl));
    }

    #[test]
    fn test_stale_decode_is_discarded() {
        let image = ImageResource::new("search");
        image.inner.state.lock().generation = 2;

        let pixels = RawImageData::new(1, 1, vec![0, 0, 0, 255]).unwrap();
        image.settle(1, Ok(pixels));
        assert!(!image.is_complete());
    }
}
