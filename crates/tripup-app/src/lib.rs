//! # tripup-app
//!
//! Command-line host for the TripUp sync pipeline.
//!
//! This crate provides:
//! - HTTP clients for the REST API and blob storage
//! - A photo library backed by a directory of media files
//! - A reachability monitor feeding system status to the asset manager
//! - Environment-driven configuration and the `tripup` binary

pub mod app;
pub mod config;
pub mod http;
pub mod library;
pub mod monitor;

pub use app::App;
pub use config::AppConfig;
pub use http::{HttpAssetApi, HttpCloudStorage};
pub use library::DirectoryPhotoLibrary;
pub use monitor::ReachabilityMonitor;
