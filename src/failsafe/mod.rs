//! Failsafe mechanisms: bounded retry with exponential backoff

mod retry;

pub use retry::{RetryPolicy, with_retry};
