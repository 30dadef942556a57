pub mod builder;
pub mod codec;
pub mod constants;
pub mod error;
pub mod generation;
pub mod hashing;
pub mod message;
pub mod signature;
pub mod versions;


// Re-export the main entry points for easy access
pub use builder::{Builder, BuilderOptions};
pub use error::SigError;
pub use generation::{Generator, GeneratorOptions};
pub use hashing::{HashServerClient, HashServerConfig, Hasher};

/// Wall-clock time in milliseconds since the Unix epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
