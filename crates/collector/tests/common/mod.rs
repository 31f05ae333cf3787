//! Shared test utilities.

pub mod flusher;
pub mod metadata;

#[allow(unused_imports)]
pub use flusher::{FailingFlusher, FlusherCall, PurgingFlusher, RecordingFlusher};
#[allow(unused_imports)]
pub use metadata::{PostgresTestMetadata, TestMetadata, run_store_test_both};
