pub mod prompt;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod response_parser;
pub mod types;
