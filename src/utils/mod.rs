pub mod command;
pub mod shell;
