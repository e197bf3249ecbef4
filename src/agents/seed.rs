use tracing::info;

use crate::agents::{NewAgent, Registry};
use crate::error::{DispatchError, Result};
use crate::tools::{ToolDefinition, ToolKind};

pub const DEFAULT_AGENT_ID: &str = "web-scraping-assistant";
pub const TRANSLATOR_AGENT_ID: &str = "translator";

const SCRAPING_INSTRUCTIONS: &str = "You are a helpful assistant that returns insights on data from a webpage.
Use the scrape_web_page tool to get the content from the page.
Use the scrape_multiple_links tool to scrape several pages and return the content as a zip file.
Use the create_csv_file tool to turn table data from a website into CSV files.
Always include the links of any files you produced in your answer.";

const TRANSLATOR_INSTRUCTIONS: &str = "You are a translator. Use the translate tool to translate the text \
the user gives you into the language they ask for, then reply with the translation only.";

pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::builtin(
            "scrape_web_page",
            "Scrape web page",
            "Fetches one web page and returns its title and visible text.",
            ToolKind::Fetch,
        ),
        ToolDefinition::builtin(
            "scrape_multiple_links",
            "Scrape multiple links",
            "Fetches several pages concurrently and bundles their text into a downloadable zip archive with a manifest.",
            ToolKind::BatchFetch,
        ),
        ToolDefinition::builtin(
            "create_csv_file",
            "Create CSV file",
            "Extracts the HTML tables of a page and saves each one as a downloadable CSV file.",
            ToolKind::ExtractTable,
        ),
        ToolDefinition::builtin(
            "translate",
            "Translate",
            "Translates text into a target language.",
            ToolKind::Translate,
        ),
    ]
}

pub fn builtin_agents() -> Vec<NewAgent> {
    vec![
        NewAgent::new(
            "Web Scraping Assistant (default)",
            SCRAPING_INSTRUCTIONS,
            vec![
                "scrape_web_page".to_string(),
                "scrape_multiple_links".to_string(),
                "create_csv_file".to_string(),
            ],
        )
        .with_id(DEFAULT_AGENT_ID),
        NewAgent::new("Translator", TRANSLATOR_INSTRUCTIONS, vec!["translate".to_string()])
            .with_id(TRANSLATOR_AGENT_ID),
    ]
}

/// Registers the built-in tools and agents; entries that already exist are left alone.
pub async fn seed(registry: &Registry) -> Result<()> {
    let mut created = 0;

    for tool in builtin_tools() {
        match registry.create_tool(tool).await {
            Ok(_) => created += 1,
            Err(DispatchError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    for agent in builtin_agents() {
        match registry.create_agent(agent).await {
            Ok(_) => created += 1,
            Err(DispatchError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }

    info!("Seeded registry ({} new entries)", created);
    Ok(())
}
