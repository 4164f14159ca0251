//! Configuration module for retrace
//!
//! Holds the replay run options and their validation. The CLI in `main.rs`
//! maps flags onto [`ReplayConfig`]; the report writer embeds the struct in
//! every result document.

mod replay;

pub use replay::{
    validate_config, ReplayConfig, DEFAULT_REPORT_DIR, DEFAULT_TIMEOUT_SECS, DEFAULT_TRACE_PATH,
};
