pub mod page_text;
pub mod table;

pub use page_text::{page_title, truncate_chars, visible_text};
pub use table::{Table, TableExtractor};
