//! # Monkey Abstract Syntax Tree
//!
//! This module defines the Abstract Syntax Tree (AST) for the Monkey language.
//! The AST is produced by the parser and consumed by the bytecode compiler.
//!
//! ## Documentation conventions
//!
//! - `Display` renders every prefix and infix form fully parenthesized, so
//!   `1 + 2 * 3` prints as `(1 + (2 * 3))`.
//! - A `let`-bound function literal prints its binding name as `fn<name>(...)`.

pub mod node;
pub mod program;

pub use node::{BlockStatement, Expression, InfixOperator, PrefixOperator, Statement};
pub use program::Program;
