//! Reader for the textual function format printed by `ir::write`.

#[macro_use]
mod error;
mod lexer;
mod parser;

pub use error::{Location, ParseError, ParseResult};
pub use lexer::LexError;

pub use parser::{parse_function, parse_functions};
