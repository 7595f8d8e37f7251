pub mod app;
pub mod archive;
pub mod config;
pub mod convert;
pub mod domain;
pub mod error;
pub mod matrix;
pub mod naming;
pub mod output;
pub mod store;
