//! Line-at-a-time evaluation with state carried between lines.

use std::io::{self, BufRead, Write};

use tracing::debug;

use crate::Error;
use crate::bytecode::{Compiler, SymbolTable};
use crate::frontend::parse_source;
use crate::runtime::Object;
use crate::runtime::Vm;

const PROMPT: &str = ">> ";

/// Symbol table, constant pool and globals shared by every line of a session.
pub struct Session {
    symbol_table: SymbolTable,
    constants: Vec<Object>,
    globals: Vec<Object>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session {
            symbol_table: SymbolTable::new(),
            constants: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Compiles and runs one line.
    ///
    /// A line that fails to compile leaves the session untouched. A runtime
    /// failure keeps the definitions the line compiled and whatever globals
    /// it assigned before failing.
    pub fn eval(&mut self, source: &str) -> Result<Object, Error> {
        let program = parse_source(source)?;

        let mut compiler = Compiler::with_state(self.symbol_table.clone(), self.constants.clone());
        compiler.compile(&program)?;
        let bytecode = compiler.bytecode();
        let (symbol_table, constants) = compiler.into_state();
        self.symbol_table = symbol_table;
        self.constants = constants;

        let mut vm = Vm::with_globals(bytecode, std::mem::take(&mut self.globals));
        let result = vm.run();
        let value = vm.last_popped().clone();
        self.globals = vm.into_globals();

        debug!(constants = self.constants.len(), "line evaluated");
        result?;
        Ok(value)
    }
}

/// Reads lines from `input` until EOF or `exit`, printing each result.
pub fn start(input: impl BufRead, mut output: impl Write) -> io::Result<()> {
    let mut session = Session::new();
    let mut lines = input.lines();

    loop {
        write!(output, "{}", PROMPT)?;
        output.flush()?;

        let Some(line) = lines.next().transpose()? else {
            writeln!(output)?;
            return Ok(());
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            return Ok(());
        }

        match session.eval(line) {
            Ok(value) => writeln!(output, "{}", value)?,
            Err(e) => writeln!(output, "{}", e)?,
        }
    }
}
