//! Conversational data analysis: an analyst model writes Python, a sandboxed
//! interpreter runs it, an evaluator judges the output and a rewriter fixes
//! failed attempts until one is accepted or the attempt budget runs out.

pub mod artifacts;
pub mod config;
pub mod conversation;
pub mod dataset;
pub mod evaluation;
pub mod execution;
pub mod extract;
pub mod handlers;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod printer;
pub mod process;
pub mod role;
pub mod service;
pub mod session;
