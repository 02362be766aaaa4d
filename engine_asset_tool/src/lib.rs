//! `engine_asset_tool`
//!
//! Command line front end for `engine_assets`:
//! - Argument parsing
//! - Directory catalog setup
//! - Label batch load with progress output
//! - Single key loads

pub mod tool;

pub use tool::{parse_args, run, ToolArgs, ToolSummary};
