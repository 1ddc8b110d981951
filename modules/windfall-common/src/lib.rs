pub mod config;
pub mod text;
pub mod types;

pub use config::Config;
pub use types::{CaptureRecord, EnrichedOpportunity, Opportunity};
