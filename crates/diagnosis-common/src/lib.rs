pub mod error;
pub mod llm;
pub mod redis;
