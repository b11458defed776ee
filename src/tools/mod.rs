// Tool Hub / Proxy - mediates external-tool calls through a uniform
// interface guarded by a circuit breaker (spec §4.3).

pub mod breaker;
pub mod hub;
pub mod provider;

pub use breaker::{Admission, CircuitBreaker};
pub use hub::{synthesize_data_source_tools, ToolHub};
pub use provider::{HealthStatus, MockToolProvider, ToolProviderClient};
