//! Bucket cross-check library
//!
//! Verifies S3 credentials, lists a bucket and downloads its objects through
//! three independent client backends so their behavior can be compared. The
//! binary in `main.rs` is a thin wrapper over [`app::App`].

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod download;
pub mod listing;
pub mod s3;
