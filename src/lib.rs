//! Desync RethinkDB bootstrapper.
//!
//! Opens the initial database connection at process start and reports the
//! outcome on the log stream.

pub mod bootstrap;

pub use bootstrap::{bootstrap_connection, run, BootstrapState};
