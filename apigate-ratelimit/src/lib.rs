pub mod bucket;
pub mod quota;

pub use bucket::{AcquireResult, RateLimiter};
pub use quota::{QuotaChecker, QuotaResult};
