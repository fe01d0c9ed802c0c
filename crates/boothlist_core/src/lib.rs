pub mod aggregate;
pub mod avatar;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod decompose;
pub mod export;
pub mod extract;
pub mod fetch;
pub mod input;
pub mod model;
