pub(crate) mod io_utils;
pub mod retry;

pub use retry::{RetryPolicy, duration_ms, retry_with_backoff};
