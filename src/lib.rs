pub mod interpreter;
pub mod reader;
