pub mod manager;
pub mod stealth;


pub use manager::BrowserManager;
pub use stealth::UserAgentGenerator;
