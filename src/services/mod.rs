pub mod hub;
pub mod observer;
pub mod store;

pub use hub::{CommitOutcome, CommitScheduler, HubApi, RemoteRepository};
pub use observer::{wrap_openai, ChatCompletionClient, ObservedClient, OpenAiClient};
pub use store::{DatasetsStore, Store};
