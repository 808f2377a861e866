pub mod aggregate;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod eutils;
pub mod frequency;
pub mod harvest;
pub mod output;
pub mod report;
pub mod store;
pub mod url_param;
