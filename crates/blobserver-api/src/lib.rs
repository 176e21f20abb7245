//! blobserver-api: HTTP front-end for blobserver
//!
//! Serves `GET /<blob-id>` from the blob cache, pulling the blob through
//! the durable store or the origin on a local miss.

pub mod rest;

pub use rest::create_router;
