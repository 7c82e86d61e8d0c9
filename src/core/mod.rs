// NetSleuth - core/mod.rs
//
// Core business logic layer: template compiler and engine, selection,
// aggregation, discovery and export.
// Must NOT depend on: app or platform. No direct file reads.

pub mod aggregate;
pub mod cache;
pub mod discovery;
pub mod engine;
pub mod export;
pub mod model;
pub mod profile;
pub mod selector;
pub mod store;
pub mod template;
