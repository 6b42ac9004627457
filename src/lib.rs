//! Monkey: a small expression language compiled to stack bytecode.
//!
//! Source goes through [`frontend`] (lexer and Pratt parser) into the
//! [`lang`] AST, is lowered to [`bytecode`] by the compiler, and is executed
//! by the stack machine in [`runtime`].

pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod repl;
pub mod runtime;

use crate::bytecode::{Bytecode, CompileError, Compiler};
use crate::frontend::{LexerError, ParserError, parse_source};
use crate::runtime::{Object, RuntimeError, Vm};

/// Any failure between source text and a finished run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("lexer error: {0}")]
    Lexer(#[from] LexerError),

    #[error("parse error: {0}")]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Parses and compiles `source` with a fresh compiler.
pub fn compile(source: &str) -> Result<Bytecode, Error> {
    let program = parse_source(source)?;
    let mut compiler = Compiler::new();
    compiler.compile(&program)?;
    Ok(compiler.bytecode())
}

/// Compiles and runs `source`, returning the last value popped off the stack.
pub fn run(source: &str) -> Result<Object, Error> {
    let bytecode = compile(source)?;
    let mut vm = Vm::new(bytecode);
    vm.run()?;
    Ok(vm.last_popped().clone())
}
