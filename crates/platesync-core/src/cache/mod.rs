//! Response and inference caching
//!
//! [`ResponseCache`] stores JSON values under logical keys with a TTL and an
//! optional source hash. Keys come from the [`key`] helpers: endpoint plus
//! canonical query for reads, content hash plus identity for results
//! derived from images. [`CachedAnalyzer`] puts the two together in front
//! of an AI image analyzer.

mod entry;
mod inference;
pub mod key;
mod response;

pub use entry::CacheEntry;
pub use inference::{CachedAnalyzer, ImageAnalyzer};
pub use key::ContentKey;
pub use response::{CacheSource, CacheStats, Cached, ResponseCache};
