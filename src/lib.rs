pub mod action_catalog;
pub mod analysis;
pub mod config;
pub mod engine;
pub mod facts;
pub mod generators;
pub mod models;
pub mod reporter;
pub mod sql;
