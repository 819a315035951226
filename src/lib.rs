pub mod compaction;
pub mod config;
pub mod errors;
pub mod logging;
pub mod pregate;
pub mod validation;
