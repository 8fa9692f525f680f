pub use bluebase_protocol as protocol;

pub mod alignment;
pub mod config;
pub mod error;
pub mod iupac_code;
pub mod monitor;
pub mod normalize;
pub mod notifier;
pub mod report;
pub mod stats;
pub mod supervisor;
pub mod task;
pub mod tool;
