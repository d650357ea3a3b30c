//! File resolution, health checking and the `rxfer` command line tool
//!
//! This crate sits on top of the protocol handlers in `transfer`:
//!
//! - [`resolver`]: named groups of files resolved from local paths, URLs or dependency notations,
//!   cached by a hash of their key and resolved in parallel
//! - [`health`]: parallel probes with bounded retries and assurance rounds
//! - [`config`]: the TOML settings file feeding both of them and the transfer manager
//!
//! The `rxfer` binary owns the run [`common::Context`] and exposes the operations as
//! subcommands; see `rxfer --help`.

pub mod config;
pub mod health;
pub mod resolver;

pub use config::Settings;
pub use health::{HealthCheck, HealthChecker, HealthOptions, HealthState, HealthStatus};
pub use resolver::{FileGroup, FileResolution, FileSource, Resolver, ResolverOptions};

#[derive(Copy, Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Summary {
    pub transfer: transfer::manager::Summary,
    pub groups_resolved: usize,
    pub files_resolved: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            transfer: self.transfer + other.transfer,
            groups_resolved: self.groups_resolved + other.groups_resolved,
            files_resolved: self.files_resolved + other.files_resolved,
            checks_passed: self.checks_passed + other.checks_passed,
            checks_failed: self.checks_failed + other.checks_failed,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}\n\
            groups resolved: {}\n\
            files resolved: {}\n\
            checks passed: {}\n\
            checks failed: {}",
            self.transfer,
            self.groups_resolved,
            self.files_resolved,
            self.checks_passed,
            self.checks_failed,
        )
    }
}
