//! Terminal output for the CLI.
//!
//! Provides styled tables and spinners for index state, search results
//! and maintenance reports.

pub mod progress;
pub mod tables;

pub use progress::{create_spinner, with_spinner};
pub use tables::{
    TableBuilder, create_analysis_table, create_search_table, create_stats_table,
    create_summary_table, create_verify_table,
};
