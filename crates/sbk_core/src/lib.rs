//! sbk core - songbook build orchestration.
//!
//! Loads songbook descriptors, runs named build steps on a worker thread
//! under a supervisor that reports progress and honours stop requests, and
//! carries the configuration and logging a host needs around that.
//! Used by the `sbk` command line tool; hosts may embed it directly.

pub mod config;
pub mod logging;
pub mod orchestrator;
pub mod songbook;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_returns_value() {
        assert!(!version().is_empty());
    }
}
