pub mod config;
pub mod dataset;
pub mod fetch_error;
pub mod importers;
pub mod locator;
pub mod names;
pub mod pivot;
pub mod render;
pub mod services;
pub mod utils;
