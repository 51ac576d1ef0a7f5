pub mod chain;
pub mod common;
pub mod errors;
pub mod records;
