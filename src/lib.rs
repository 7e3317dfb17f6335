pub mod app;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod locator;
pub mod output;
pub mod report;
pub mod scaffold;
pub mod store;
pub mod validate;
