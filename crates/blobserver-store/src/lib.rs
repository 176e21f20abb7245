//! blobserver-store: Tiered blob storage
//!
//! This crate provides the storage side of blobserver:
//! - Local blob cache with atomic publication
//! - Durable object store backends (GCS, filesystem)
//! - Origin registry and retrying HTTP fetcher
//! - Single-flight download coordination

pub mod atomic;
pub mod cache;
pub mod coordinator;
pub mod durable;
pub mod fetch;
pub mod origin;
pub mod resolver;

pub use atomic::{write_atomic, write_atomic_stream, AtomicFile};
pub use cache::{BlobCache, BlobHandle};
pub use coordinator::{DownloadCoordinator, InFlightJobInfo};
pub use durable::{
    open_store, DefaultCredentials, DurableStore, FsStore, GcsStore, StaticToken, TokenSource,
    UploadOutcome,
};
pub use fetch::{stall_guarded, RetryingFetcher, DEFAULT_STALL_TIMEOUT};
pub use origin::OriginResolver;
pub use resolver::{Resolution, TieredResolver};
