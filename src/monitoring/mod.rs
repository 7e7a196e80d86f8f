pub mod collector;
pub mod connections;
pub mod correlation;
pub mod process_cache;
