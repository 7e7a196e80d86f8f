pub mod models;

pub use models::{CSV_HEADER, NetworkEvent};
