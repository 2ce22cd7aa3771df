pub mod catalog;
pub mod config;
pub mod digest;
pub mod llm;
pub mod paper;
pub mod pipeline;
pub mod recommend;
pub mod store;
pub mod summarize;
pub mod testing;
pub mod web;
