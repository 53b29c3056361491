pub mod retry;

pub use retry::{RetryConfig, retry_on_conflict};
