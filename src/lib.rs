pub mod app;
pub mod config;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod irida;
pub mod manifest;
pub mod merge;
pub mod output;
pub mod upload;
pub mod validation;
