pub mod commands;
pub mod traits;
