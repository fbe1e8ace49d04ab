pub mod error;
pub mod config;
pub mod clock;
pub mod model;
pub mod kv;
pub mod crypto;
pub mod identity;
pub mod policy;
pub mod workflow;
pub mod integrity;
pub mod audit;
pub mod blobstore;
pub mod service;

pub use service::{CareCore, Collaborators};
pub use error::{CoreError, CoreResult};

// Test-only printing helper: expands to eprintln! during tests and debug builds.
// Usage: tprintln!("debug: {}", value);
#[cfg(any(test, debug_assertions))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ( eprintln!($($arg)*) );
}

// In release builds, provide a no-op tprintln! so calls compile without effect.
#[cfg(not(any(test, debug_assertions)))]
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => ({
        // Preserve formatting checks in release without producing code
        if false { let _ = format!($($arg)*); }
    });
}
