//! Photo upload orchestration.
//!
//! Batch upload jobs backed by presigned object-store writes, with completion
//! verification, race-safe job counters, a stalled-upload sweep and live
//! status streams per job.

pub mod app_state;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
