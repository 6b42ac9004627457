pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod symbol_table;

pub use compile::Compiler;
pub use compile_error::CompileError;
pub use ir::{Bytecode, BytecodeError, Instructions};
pub use op::Opcode;
pub use symbol_table::{Symbol, SymbolScope, SymbolTable};
