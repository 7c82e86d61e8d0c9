// NetSleuth - platform/mod.rs
//
// Platform abstraction layer: configuration paths, config.toml, file reads.
// Dependencies: standard library, directories, memmap2, util.
// Must NOT depend on: core, app.

pub mod config;
pub mod fs;
