// src/lib.rs

pub mod config;
pub mod error;
pub mod identity;
pub mod mcp;
pub mod router;
pub mod session;
pub mod state;
pub mod summarizer;
