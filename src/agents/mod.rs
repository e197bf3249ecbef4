pub mod agent;
pub mod registry;
pub mod seed;


pub use agent::{Agent, AgentId, AgentSummary, NewAgent};
pub use registry::Registry;
pub use seed::{seed, DEFAULT_AGENT_ID, TRANSLATOR_AGENT_ID};
