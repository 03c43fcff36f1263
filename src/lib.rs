//! Cover art resolution for roqtune.
//!
//! [`CoverManager`] runs lookups keyed by [`AlbumKey`] through an ordered
//! provider list: local storage first, then the network. Concurrent lookups
//! for one album share a single pipeline, rejected and unresolvable covers
//! are remembered, and network covers are written through to the disk cache.

pub mod album_key;
pub mod blob_store;
pub mod config;
pub mod cover_ledger;
pub mod cover_manager;
pub mod cover_request;
pub mod decode_worker;
pub mod fetch_worker;
pub mod image_pipeline;
pub mod protocol;
pub mod providers;
pub mod transport;
pub mod worker_pool;

pub use album_key::AlbumKey;
pub use config::CoversConfig;
pub use cover_manager::{CoverManager, CoverManagerParts};
pub use cover_request::{CoverImages, CoverSizing};
pub use protocol::{CoverEvent, CoverListener};
