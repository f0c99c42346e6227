//! Syntax front-end for phpfold: span model, lexer, parser, arena tree
//! model, and printer. The optimizer core consumes and produces [`Tree`]s;
//! this crate is the only place concrete syntax is known.

pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod span;
pub mod tree;

pub use error::ParseError;
pub use parser::parse;
pub use printer::{print_expression, print_program};
pub use span::Span;
pub use tree::{NodeId, NodeKind, Tree};
