//! servicex: a modular chat bot runtime.
//!
//! This library crate re-exports modules so integration tests
//! (under `tests/`) can access them.

pub mod bot;
pub mod cli;
pub mod comm;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod extensions;
pub mod logging;
pub mod scheduler;
pub mod store;
pub mod utils;

/// Return the servicex home directory.
///
/// Resolution order:
/// 1. `SERVICEX_HOME` environment variable
/// 2. `$HOME/.servicex`
pub fn servicex_home() -> std::path::PathBuf {
    if let Ok(p) = std::env::var("SERVICEX_HOME") {
        std::path::PathBuf::from(p)
    } else {
        dirs::home_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join(".servicex")
    }
}
