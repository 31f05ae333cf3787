//! Collector client for the silo chunk garbage collector.
//!
//! This crate sequences reference graph transactions with the flusher calls
//! the safe deletion protocol requires:
//! - [`CollectorClient`] is the façade producers call to reserve chunks and
//!   update references
//! - [`Flusher`] is the seam to the external component that mediates
//!   object-storage presence and erasure
//! - [`Reaper`] re-emits delete intents lost to crashes or flusher pushback

pub mod client;
pub mod error;
pub mod flusher;
pub mod reaper;

pub use client::CollectorClient;
pub use error::{CollectorError, CollectorResult};
pub use flusher::{Flusher, FlusherError, FlusherResult};
pub use reaper::Reaper;
