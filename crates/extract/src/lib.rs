pub mod email;
pub mod extract;

pub use email::{parse_message, EmailError, ParsedEmail};
pub use extract::OrderExtractor;
