pub mod args;
pub mod definition;
pub mod executor;

pub use args::{check_url, BatchFetchArgs, ExtractTableArgs, FetchArgs, ToolInput, TranslateArgs};
pub use definition::{CatalogEntry, ParamType, ToolDefinition, ToolId, ToolKind, ToolParameter, ToolSummary};
pub use executor::{ToolExecutor, ToolOutput};
