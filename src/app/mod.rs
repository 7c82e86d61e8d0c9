// NetSleuth - app/mod.rs
//
// Application layer: profile and template loading, the Parser facade,
// batch orchestration and result persistence.
// Dependencies: core, platform.

pub mod batch;
pub mod parser;
pub mod profile_mgr;
pub mod sink;
pub mod template_mgr;
