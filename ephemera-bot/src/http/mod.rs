//! HTTP plumbing for the REST API: a transport seam and the rate-limit aware
//! client built on top of it.

pub mod rate_limit;
pub mod transport;

pub use rate_limit::{RateLimitedClient, RetryPolicy};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
