//! Appraisal predictor service
//!
//! Hosts the modeling service and exposes its health, model status and
//! metrics over HTTP.

pub mod api;
pub mod config;
