// src/mcp/tools/mod.rs

pub mod coordination;
