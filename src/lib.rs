//! Chat-commerce storefront core.
//!
//! # Modules
//!
//! - [`config`] - application configuration
//! - [`db`] - embedded storage connection and schema bootstrap
//! - [`models`] - shared domain types
//! - [`user`] - account repository and balance mutation
//! - [`catalogue`] - product repository and catalogue snapshot cache
//! - [`discount`] - discount code and reseller discount repositories
//! - [`inventory`] - exclusive reservation engine
//! - [`media_group`] - debounced multi-part upload collector
//! - [`payment`] - invoice creation, callback dispatch, provider client
//! - [`purchase`] - transactional purchase finalisation
//! - [`sweepers`] - periodic expiry/reconciliation jobs
//! - [`gateway`] - HTTP surface: bot webhook, payment webhook, browse API
//! - [`review`] - post-purchase review submission
//! - [`alert`] - operator notification for invariant violations
//! - [`error`] - crate-wide error aggregation

pub mod alert;
pub mod catalogue;
pub mod config;
pub mod db;
pub mod discount;
pub mod error;
pub mod gateway;
pub mod inventory;
pub mod logging;
pub mod media_group;
pub mod models;
pub mod money;
pub mod payment;
pub mod pricing;
pub mod purchase;
pub mod review;
pub mod sweepers;
pub mod user;

pub use config::AppConfig;
pub use error::AppError;
