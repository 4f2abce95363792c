//! Lookup texture images
//!
//! Provides:
//! - Raw pixel buffers and their PNG data URL encoding
//! - Image resources with asynchronous decode and one-shot load events
//! - The persistent texture cache
//! - Texture generation on worker threads

mod gen;
mod raw;
mod resource;
mod store;

pub use gen::{GenerationChannel, GenerationError};
pub use raw::{ImageDataError, RawImageData, PNG_DATA_URL_PREFIX};
pub use resource::ImageResource;
pub use store::{
    read_cached_pair, write_cached_pair, CacheAccessError, CachePolicy, CacheStore,
    GeneratedImagePair, MemoryStore, SqliteStore, AREA_KEY, SEARCH_KEY,
};
