pub mod llm;
pub mod market_data;
pub mod ml;
pub mod news;
pub mod types;
