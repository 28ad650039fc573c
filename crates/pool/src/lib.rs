//! TestGrid Resource Pool
//!
//! Single source of truth for execution resource availability across
//! concurrent test runs. Tracks devices, browsers, databases, and API
//! endpoints, arbitrates allocation in registration order, and probes
//! resource health per type.

pub mod health;
pub mod pool;
pub mod validator;

pub use health::HealthChecker;
pub use pool::ResourcePool;
pub use validator::ResourceValidator;
