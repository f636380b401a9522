//! Administrative safety core for a personal-portfolio web application.
//!
//! Four components behind one HTTP surface: attempt tracking, lockout
//! enforcement with exponential backoff, a hash-chained append-only audit
//! log, and a gated schema-migration runner. Credential verification stays
//! with the external auth collaborator; this crate never sees passwords.

pub mod api;
pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod lockout;
pub mod migrate;
pub mod tracker;
