//! Command-line front end: argument parsing and command dispatch.

pub mod dispatch;
pub mod parse;

pub use dispatch::execute;
pub use parse::parse_args;
