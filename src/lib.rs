pub mod agents;
pub mod api;
pub mod batch;
pub mod browser;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod llm;
pub mod parser;
pub mod service;
pub mod storage;
pub mod tools;

#[cfg(test)]
pub mod test_support;

pub use config::Config;
pub use dispatcher::{Dispatcher, Reply};
pub use error::{DispatchError, Result};
pub use service::{AgentHub, TaskPayload};
