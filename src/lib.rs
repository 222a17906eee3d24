// Public API - orchestrators, data types and output
pub mod config;
pub mod error;
pub mod export;
pub mod lookup;
pub mod probe;
pub mod state;
pub mod trace;

// CLI surface, shared with the binary
pub mod cli;
