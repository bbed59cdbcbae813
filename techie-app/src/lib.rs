pub mod config;
pub mod logging;
pub mod providers;
pub mod repl;
