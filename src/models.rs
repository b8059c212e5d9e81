pub mod chat;
pub mod record;
pub mod store_config;

pub use chat::*;
pub use record::*;
pub use store_config::*;
