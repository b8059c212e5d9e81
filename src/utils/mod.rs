pub mod json;
pub mod logger;

pub use json::{is_truthy, to_dataset_string, DatasetFormatter};
pub use logger::{init_logger, LogConfig, LogLevel};
