use std::rc::Rc;

use tracing::{debug, instrument};

use crate::{
    bytecode::{
        Bytecode, Instructions,
        compile_error::CompileError,
        op::{Opcode, make},
        symbol_table::{Scope, Symbol, SymbolScope, SymbolTable},
    },
    lang::{BlockStatement, Expression, InfixOperator, PrefixOperator, Program, Statement},
    runtime::object::{CompiledFunction, Object},
};

/// Operand written for a forward jump until its target is known.
const JUMP_PLACEHOLDER: usize = u16::MAX as usize;

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

/// Instruction buffer of one function body (or of the main program).
#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

/// Single-pass AST to bytecode compiler.
///
/// Function literals are compiled into their own [`CompilationScope`]; the
/// finished body becomes a `CompiledFunction` constant of the enclosing scope.
pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scope: CompilationScope,
    enclosing: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_state(SymbolTable::new(), Vec::new())
    }

    /// Resumes from the symbols and constants of a previous compile, so a
    /// REPL line can refer to bindings made by earlier lines.
    pub fn with_state(symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        Self {
            constants,
            symbol_table,
            scope: CompilationScope::default(),
            enclosing: Vec::new(),
        }
    }

    pub fn into_state(self) -> (SymbolTable, Vec<Object>) {
        (self.symbol_table, self.constants)
    }

    #[instrument(skip_all, fields(statements = program.statements.len()))]
    pub fn compile(&mut self, program: &Program) -> Result<(), CompileError> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        debug!(
            bytes = self.scope.instructions.len(),
            constants = self.constants.len(),
            "compiled program"
        );
        Ok(())
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode::new(self.scope.instructions.clone(), self.constants.clone())
    }

    // ============================================================
    // Statements
    // ============================================================

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Let { name, value } => {
                self.compile_expression(value)?;
                let symbol = self.symbol_table.define(name);
                match symbol.scope {
                    SymbolScope::Global => {
                        if symbol.index > u16::MAX as usize {
                            return Err(CompileError::TooManyGlobals(name.clone()));
                        }
                        self.emit(Opcode::SetGlobal, &[symbol.index]);
                    }
                    _ => {
                        if symbol.index > u8::MAX as usize {
                            return Err(CompileError::TooManyLocals(name.clone()));
                        }
                        self.emit(Opcode::SetLocal, &[symbol.index]);
                    }
                }
            }
            Statement::Return(value) => {
                self.compile_expression(value)?;
                self.emit(Opcode::ReturnValue, &[]);
            }
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, &[]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &BlockStatement) -> Result<(), CompileError> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    /// Compiles an `if` branch so it leaves exactly one value on the stack.
    fn compile_branch(&mut self, block: &BlockStatement) -> Result<(), CompileError> {
        self.compile_block(block)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        } else {
            self.emit(Opcode::Null, &[]);
        }
        Ok(())
    }

    // ============================================================
    // Expressions
    // ============================================================

    fn compile_expression(&mut self, expression: &Expression) -> Result<(), CompileError> {
        match expression {
            Expression::Integer(value) => {
                let index = self.add_constant(Object::Integer(*value))?;
                self.emit(Opcode::Constant, &[index]);
            }
            Expression::String(value) => {
                let index = self.add_constant(Object::string(value.as_str()))?;
                self.emit(Opcode::Constant, &[index]);
            }
            Expression::Boolean(true) => {
                self.emit(Opcode::True, &[]);
            }
            Expression::Boolean(false) => {
                self.emit(Opcode::False, &[]);
            }

            Expression::Identifier(name) => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?;
                self.load_symbol(&symbol)?;
            }

            Expression::Prefix { operator, right } => {
                self.compile_expression(right)?;
                match operator {
                    PrefixOperator::Minus => self.emit(Opcode::Minus, &[]),
                    PrefixOperator::Bang => self.emit(Opcode::Bang, &[]),
                };
            }

            Expression::Infix {
                operator,
                left,
                right,
            } => {
                self.compile_expression(left)?;
                self.compile_expression(right)?;
                let op = match operator {
                    InfixOperator::Plus => Opcode::Add,
                    InfixOperator::Minus => Opcode::Sub,
                    InfixOperator::Multiply => Opcode::Mul,
                    InfixOperator::Divide => Opcode::Div,
                    InfixOperator::GreaterThan => Opcode::GreaterThan,
                    InfixOperator::LessThan => Opcode::LessThan,
                    InfixOperator::Equal => Opcode::Equal,
                    InfixOperator::NotEqual => Opcode::NotEqual,
                };
                self.emit(op, &[]);
            }

            Expression::If {
                condition,
                consequence,
                alternative,
            } => {
                self.compile_expression(condition)?;
                let jump_not_truthy = self.emit(Opcode::JumpNotTruthy, &[JUMP_PLACEHOLDER]);

                self.compile_branch(consequence)?;
                let jump = self.emit(Opcode::Jump, &[JUMP_PLACEHOLDER]);

                let after_consequence = self.scope.instructions.len();
                self.change_operand(jump_not_truthy, after_consequence)?;

                match alternative {
                    Some(alternative) => self.compile_branch(alternative)?,
                    None => {
                        self.emit(Opcode::Null, &[]);
                    }
                }

                let after_alternative = self.scope.instructions.len();
                self.change_operand(jump, after_alternative)?;
            }

            Expression::Array(elements) => {
                if elements.len() > u16::MAX as usize {
                    return Err(CompileError::LiteralTooLarge {
                        kind: "array",
                        count: elements.len(),
                    });
                }
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()]);
            }

            Expression::Hash(pairs) => {
                if pairs.len() > u16::MAX as usize {
                    return Err(CompileError::LiteralTooLarge {
                        kind: "hash",
                        count: pairs.len(),
                    });
                }
                for (key, value) in pairs {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len()]);
            }

            Expression::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[]);
            }

            Expression::Function {
                name,
                parameters,
                body,
            } => self.compile_function(name.as_deref(), parameters, body)?,

            Expression::Call {
                function,
                arguments,
            } => {
                if arguments.len() > u8::MAX as usize {
                    return Err(CompileError::TooManyArguments(arguments.len()));
                }
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()]);
            }
        }
        Ok(())
    }

    fn compile_function(
        &mut self,
        name: Option<&str>,
        parameters: &[String],
        body: &BlockStatement,
    ) -> Result<(), CompileError> {
        if parameters.len() > u8::MAX as usize {
            return Err(CompileError::TooManyParameters(parameters.len()));
        }

        self.enter_scope();

        if let Some(name) = name {
            self.symbol_table.define_function_name(name);
        }
        for parameter in parameters {
            self.symbol_table.define(parameter);
        }

        self.compile_block(body)?;

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[]);
        }

        let (instructions, scope) = self.leave_scope()?;
        let free_symbols = scope.free_symbols;
        if free_symbols.len() > u8::MAX as usize {
            return Err(CompileError::TooManyFreeVariables(free_symbols.len()));
        }
        if scope.num_definitions > u8::MAX as usize + 1 {
            return Err(CompileError::TooManyLocals(
                name.unwrap_or("<anonymous>").to_string(),
            ));
        }

        for symbol in &free_symbols {
            self.load_symbol(symbol)?;
        }

        let function = CompiledFunction {
            instructions,
            num_locals: scope.num_definitions,
            num_parameters: parameters.len(),
            name: name.map(str::to_string),
        };
        let index = self.add_constant(Object::CompiledFunction(Rc::new(function)))?;
        self.emit(Opcode::Closure, &[index, free_symbols.len()]);
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<(), CompileError> {
        match symbol.scope {
            SymbolScope::Global => {
                self.emit(Opcode::GetGlobal, &[symbol.index]);
            }
            SymbolScope::Local => {
                if symbol.index > u8::MAX as usize {
                    return Err(CompileError::TooManyLocals(symbol.name.clone()));
                }
                self.emit(Opcode::GetLocal, &[symbol.index]);
            }
            SymbolScope::Builtin => {
                self.emit(Opcode::GetBuiltin, &[symbol.index]);
            }
            SymbolScope::Free => {
                self.emit(Opcode::GetFree, &[symbol.index]);
            }
            SymbolScope::Function => {
                self.emit(Opcode::CurrentClosure, &[]);
            }
        }
        Ok(())
    }

    // ============================================================
    // Emission
    // ============================================================

    fn add_constant(&mut self, object: Object) -> Result<usize, CompileError> {
        if self.constants.len() > u16::MAX as usize {
            return Err(CompileError::TooManyConstants);
        }
        self.constants.push(object);
        Ok(self.constants.len() - 1)
    }

    fn emit(&mut self, op: Opcode, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let position = self.scope.instructions.push_instruction(&instruction);

        self.scope.previous_instruction = self.scope.last_instruction;
        self.scope.last_instruction = Some(EmittedInstruction {
            opcode: op,
            position,
        });
        position
    }

    fn last_instruction_is(&self, op: Opcode) -> bool {
        self.scope
            .last_instruction
            .is_some_and(|last| last.opcode == op)
    }

    fn remove_last_pop(&mut self) {
        if let Some(last) = self.scope.last_instruction {
            self.scope.instructions.truncate(last.position);
            self.scope.last_instruction = self.scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        if let Some(last) = self.scope.last_instruction.as_mut() {
            self.scope
                .instructions
                .overwrite(last.position, &make(Opcode::ReturnValue, &[]));
            last.opcode = Opcode::ReturnValue;
        }
    }

    /// Backpatches the operand of the jump emitted at `position`.
    fn change_operand(&mut self, position: usize, operand: usize) -> Result<(), CompileError> {
        if operand > u16::MAX as usize {
            return Err(CompileError::JumpOutOfRange(operand));
        }
        let op = Opcode::try_from(self.scope.instructions[position])
            .map_err(|e| CompileError::Internal(e.to_string()))?;
        self.scope
            .instructions
            .overwrite(position, &make(op, &[operand]));
        Ok(())
    }

    // ============================================================
    // Scopes
    // ============================================================

    fn enter_scope(&mut self) {
        let enclosing = std::mem::take(&mut self.scope);
        self.enclosing.push(enclosing);
        self.symbol_table.enter_scope();
        debug!(depth = self.enclosing.len(), "enter compilation scope");
    }

    fn leave_scope(&mut self) -> Result<(Instructions, Scope), CompileError> {
        let enclosing = self
            .enclosing
            .pop()
            .ok_or_else(|| CompileError::Internal("left the main scope".to_string()))?;
        let finished = std::mem::replace(&mut self.scope, enclosing);
        let symbols = self
            .symbol_table
            .leave_scope()
            .ok_or_else(|| CompileError::Internal("symbol scopes out of sync".to_string()))?;

        debug!(
            depth = self.enclosing.len(),
            locals = symbols.num_definitions,
            free = symbols.free_symbols.len(),
            "leave compilation scope"
        );
        Ok((finished.instructions, symbols))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_source;
    use pretty_assertions::assert_eq;

    // ============================================================
    // Test Helpers
    // ============================================================

    enum Expected {
        Int(i64),
        Str(&'static str),
        Function(Vec<Vec<u8>>),
    }

    fn compile_source(input: &str) -> Result<Bytecode, CompileError> {
        let program = parse_source(input).expect("parse should succeed");
        let mut compiler = Compiler::new();
        compiler.compile(&program)?;
        Ok(compiler.bytecode())
    }

    fn concat(instructions: Vec<Vec<u8>>) -> Instructions {
        instructions.into_iter().collect()
    }

    /// Compares disassembly so mismatches show as readable diffs
    fn assert_instructions(actual: &Instructions, expected: Vec<Vec<u8>>, input: &str) {
        assert_eq!(
            actual.to_string(),
            concat(expected).to_string(),
            "wrong instructions for {}",
            input
        );
    }

    fn assert_compiles(input: &str, constants: Vec<Expected>, instructions: Vec<Vec<u8>>) {
        let bytecode = compile_source(input)
            .unwrap_or_else(|e| panic!("compilation of {:?} failed: {}", input, e));

        assert_instructions(&bytecode.instructions, instructions, input);
        assert_eq!(
            bytecode.constants.len(),
            constants.len(),
            "wrong number of constants for {}",
            input
        );

        for (i, (actual, expected)) in bytecode.constants.iter().zip(constants).enumerate() {
            match (actual, expected) {
                (Object::Integer(n), Expected::Int(want)) => {
                    assert_eq!(*n, want, "constant {} of {}", i, input)
                }
                (Object::String(s), Expected::Str(want)) => {
                    assert_eq!(&**s, want, "constant {} of {}", i, input)
                }
                (Object::CompiledFunction(func), Expected::Function(want)) => {
                    assert_instructions(&func.instructions, want, input)
                }
                (other, _) => panic!("constant {} of {} has unexpected value {:?}", i, input, other),
            }
        }
    }

    fn op(opcode: Opcode) -> Vec<u8> {
        make(opcode, &[])
    }

    fn op1(opcode: Opcode, operand: usize) -> Vec<u8> {
        make(opcode, &[operand])
    }

    use Expected::{Function, Int, Str};
    use Opcode::*;

    // ============================================================
    // Expressions
    // ============================================================

    #[test]
    fn test_integer_arithmetic() {
        assert_compiles(
            "1 + 2",
            vec![Int(1), Int(2)],
            vec![op1(Constant, 0), op1(Constant, 1), op(Add), op(Pop)],
        );
        assert_compiles(
            "1; 2",
            vec![Int(1), Int(2)],
            vec![op1(Constant, 0), op(Pop), op1(Constant, 1), op(Pop)],
        );
        assert_compiles(
            "1 - 2",
            vec![Int(1), Int(2)],
            vec![op1(Constant, 0), op1(Constant, 1), op(Sub), op(Pop)],
        );
        assert_compiles(
            "1 * 2",
            vec![Int(1), Int(2)],
            vec![op1(Constant, 0), op1(Constant, 1), op(Mul), op(Pop)],
        );
        assert_compiles(
            "2 / 1",
            vec![Int(2), Int(1)],
            vec![op1(Constant, 0), op1(Constant, 1), op(Div), op(Pop)],
        );
        assert_compiles(
            "-1",
            vec![Int(1)],
            vec![op1(Constant, 0), op(Minus), op(Pop)],
        );
    }

    #[test]
    fn test_constants_are_not_deduplicated() {
        assert_compiles(
            "1 + 1",
            vec![Int(1), Int(1)],
            vec![op1(Constant, 0), op1(Constant, 1), op(Add), op(Pop)],
        );
    }

    #[test]
    fn test_boolean_expressions() {
        assert_compiles("true", vec![], vec![op(True), op(Pop)]);
        assert_compiles("false", vec![], vec![op(False), op(Pop)]);
        assert_compiles(
            "1 > 2",
            vec![Int(1), Int(2)],
            vec![op1(Constant, 0), op1(Constant, 1), op(GreaterThan), op(Pop)],
        );
        assert_compiles(
            "1 < 2",
            vec![Int(1), Int(2)],
            vec![op1(Constant, 0), op1(Constant, 1), op(LessThan), op(Pop)],
        );
        assert_compiles(
            "1 == 2",
            vec![Int(1), Int(2)],
            vec![op1(Constant, 0), op1(Constant, 1), op(Equal), op(Pop)],
        );
        assert_compiles(
            "true != false",
            vec![],
            vec![op(True), op(False), op(NotEqual), op(Pop)],
        );
        assert_compiles("!true", vec![], vec![op(True), op(Bang), op(Pop)]);
    }

    #[test]
    fn test_conditionals() {
        assert_compiles(
            "if (true) { 10 }; 3333;",
            vec![Int(10), Int(3333)],
            vec![
                op(True),
                op1(JumpNotTruthy, 10),
                op1(Constant, 0),
                op1(Jump, 11),
                op(Null),
                op(Pop),
                op1(Constant, 1),
                op(Pop),
            ],
        );
        assert_compiles(
            "if (true) { 10 } else { 20 }; 3333;",
            vec![Int(10), Int(20), Int(3333)],
            vec![
                op(True),
                op1(JumpNotTruthy, 10),
                op1(Constant, 0),
                op1(Jump, 13),
                op1(Constant, 1),
                op(Pop),
                op1(Constant, 2),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_empty_branch_yields_null() {
        assert_compiles(
            "if (true) { }",
            vec![],
            vec![
                op(True),
                op1(JumpNotTruthy, 8),
                op(Null),
                op1(Jump, 9),
                op(Null),
                op(Pop),
            ],
        );
        assert_compiles(
            "if (true) { let a = 1; }",
            vec![Int(1)],
            vec![
                op(True),
                op1(JumpNotTruthy, 14),
                op1(Constant, 0),
                op1(SetGlobal, 0),
                op(Null),
                op1(Jump, 15),
                op(Null),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_global_let_statements() {
        assert_compiles(
            "let one = 1; let two = 2;",
            vec![Int(1), Int(2)],
            vec![
                op1(Constant, 0),
                op1(SetGlobal, 0),
                op1(Constant, 1),
                op1(SetGlobal, 1),
            ],
        );
        assert_compiles(
            "let one = 1; one;",
            vec![Int(1)],
            vec![op1(Constant, 0), op1(SetGlobal, 0), op1(GetGlobal, 0), op(Pop)],
        );
        assert_compiles(
            "let one = 1; let two = one; two;",
            vec![Int(1)],
            vec![
                op1(Constant, 0),
                op1(SetGlobal, 0),
                op1(GetGlobal, 0),
                op1(SetGlobal, 1),
                op1(GetGlobal, 1),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_redefinition_reuses_global_slot() {
        assert_compiles(
            "let x = 1; let x = 2; x",
            vec![Int(1), Int(2)],
            vec![
                op1(Constant, 0),
                op1(SetGlobal, 0),
                op1(Constant, 1),
                op1(SetGlobal, 0),
                op1(GetGlobal, 0),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_string_expressions() {
        assert_compiles(
            "\"monkey\"",
            vec![Str("monkey")],
            vec![op1(Constant, 0), op(Pop)],
        );
        assert_compiles(
            "\"mon\" + \"key\"",
            vec![Str("mon"), Str("key")],
            vec![op1(Constant, 0), op1(Constant, 1), op(Add), op(Pop)],
        );
    }

    #[test]
    fn test_array_literals() {
        assert_compiles("[]", vec![], vec![op1(Array, 0), op(Pop)]);
        assert_compiles(
            "[1, 2, 3]",
            vec![Int(1), Int(2), Int(3)],
            vec![
                op1(Constant, 0),
                op1(Constant, 1),
                op1(Constant, 2),
                op1(Array, 3),
                op(Pop),
            ],
        );
        assert_compiles(
            "[1 + 2, 3 - 4, 5 * 6]",
            vec![Int(1), Int(2), Int(3), Int(4), Int(5), Int(6)],
            vec![
                op1(Constant, 0),
                op1(Constant, 1),
                op(Add),
                op1(Constant, 2),
                op1(Constant, 3),
                op(Sub),
                op1(Constant, 4),
                op1(Constant, 5),
                op(Mul),
                op1(Array, 3),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_hash_literals() {
        assert_compiles("{}", vec![], vec![op1(Hash, 0), op(Pop)]);
        assert_compiles(
            "{1: 2, 3: 4, 5: 6}",
            vec![Int(1), Int(2), Int(3), Int(4), Int(5), Int(6)],
            vec![
                op1(Constant, 0),
                op1(Constant, 1),
                op1(Constant, 2),
                op1(Constant, 3),
                op1(Constant, 4),
                op1(Constant, 5),
                op1(Hash, 3),
                op(Pop),
            ],
        );
        assert_compiles(
            "{1: 2 + 3, 4: 5 * 6}",
            vec![Int(1), Int(2), Int(3), Int(4), Int(5), Int(6)],
            vec![
                op1(Constant, 0),
                op1(Constant, 1),
                op1(Constant, 2),
                op(Add),
                op1(Constant, 3),
                op1(Constant, 4),
                op1(Constant, 5),
                op(Mul),
                op1(Hash, 2),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_index_expressions() {
        assert_compiles(
            "[1, 2, 3][1 + 1]",
            vec![Int(1), Int(2), Int(3), Int(1), Int(1)],
            vec![
                op1(Constant, 0),
                op1(Constant, 1),
                op1(Constant, 2),
                op1(Array, 3),
                op1(Constant, 3),
                op1(Constant, 4),
                op(Add),
                op(Index),
                op(Pop),
            ],
        );
        assert_compiles(
            "{1: 2}[2 - 1]",
            vec![Int(1), Int(2), Int(2), Int(1)],
            vec![
                op1(Constant, 0),
                op1(Constant, 1),
                op1(Hash, 1),
                op1(Constant, 2),
                op1(Constant, 3),
                op(Sub),
                op(Index),
                op(Pop),
            ],
        );
    }

    // ============================================================
    // Functions
    // ============================================================

    #[test]
    fn test_functions() {
        let body = vec![op1(Constant, 0), op1(Constant, 1), op(Add), op(ReturnValue)];

        assert_compiles(
            "fn() { return 5 + 10 }",
            vec![Int(5), Int(10), Function(body.clone())],
            vec![make(Closure, &[2, 0]), op(Pop)],
        );
        assert_compiles(
            "fn() { 5 + 10 }",
            vec![Int(5), Int(10), Function(body)],
            vec![make(Closure, &[2, 0]), op(Pop)],
        );
        assert_compiles(
            "fn() { 1; 2 }",
            vec![
                Int(1),
                Int(2),
                Function(vec![
                    op1(Constant, 0),
                    op(Pop),
                    op1(Constant, 1),
                    op(ReturnValue),
                ]),
            ],
            vec![make(Closure, &[2, 0]), op(Pop)],
        );
    }

    #[test]
    fn test_functions_without_return_value() {
        assert_compiles(
            "fn() { }",
            vec![Function(vec![op(Return)])],
            vec![make(Closure, &[0, 0]), op(Pop)],
        );
        assert_compiles(
            "fn() { let a = 1; }",
            vec![
                Int(1),
                Function(vec![op1(Constant, 0), op1(SetLocal, 0), op(Return)]),
            ],
            vec![make(Closure, &[1, 0]), op(Pop)],
        );
    }

    #[test]
    fn test_function_calls() {
        assert_compiles(
            "fn() { 24 }();",
            vec![Int(24), Function(vec![op1(Constant, 0), op(ReturnValue)])],
            vec![make(Closure, &[1, 0]), op1(Call, 0), op(Pop)],
        );
        assert_compiles(
            "let noArg = fn() { 24 }; noArg();",
            vec![Int(24), Function(vec![op1(Constant, 0), op(ReturnValue)])],
            vec![
                make(Closure, &[1, 0]),
                op1(SetGlobal, 0),
                op1(GetGlobal, 0),
                op1(Call, 0),
                op(Pop),
            ],
        );
        assert_compiles(
            "let oneArg = fn(a) { a }; oneArg(24);",
            vec![Function(vec![op1(GetLocal, 0), op(ReturnValue)]), Int(24)],
            vec![
                make(Closure, &[0, 0]),
                op1(SetGlobal, 0),
                op1(GetGlobal, 0),
                op1(Constant, 1),
                op1(Call, 1),
                op(Pop),
            ],
        );
        assert_compiles(
            "let manyArg = fn(a, b, c) { a; b; c }; manyArg(24, 25, 26);",
            vec![
                Function(vec![
                    op1(GetLocal, 0),
                    op(Pop),
                    op1(GetLocal, 1),
                    op(Pop),
                    op1(GetLocal, 2),
                    op(ReturnValue),
                ]),
                Int(24),
                Int(25),
                Int(26),
            ],
            vec![
                make(Closure, &[0, 0]),
                op1(SetGlobal, 0),
                op1(GetGlobal, 0),
                op1(Constant, 1),
                op1(Constant, 2),
                op1(Constant, 3),
                op1(Call, 3),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_let_statement_scopes() {
        assert_compiles(
            "let num = 55; fn() { num }",
            vec![Int(55), Function(vec![op1(GetGlobal, 0), op(ReturnValue)])],
            vec![
                op1(Constant, 0),
                op1(SetGlobal, 0),
                make(Closure, &[1, 0]),
                op(Pop),
            ],
        );
        assert_compiles(
            "fn() { let num = 55; num }",
            vec![
                Int(55),
                Function(vec![
                    op1(Constant, 0),
                    op1(SetLocal, 0),
                    op1(GetLocal, 0),
                    op(ReturnValue),
                ]),
            ],
            vec![make(Closure, &[1, 0]), op(Pop)],
        );
        assert_compiles(
            "fn() { let a = 55; let b = 77; a + b }",
            vec![
                Int(55),
                Int(77),
                Function(vec![
                    op1(Constant, 0),
                    op1(SetLocal, 0),
                    op1(Constant, 1),
                    op1(SetLocal, 1),
                    op1(GetLocal, 0),
                    op1(GetLocal, 1),
                    op(Add),
                    op(ReturnValue),
                ]),
            ],
            vec![make(Closure, &[2, 0]), op(Pop)],
        );
    }

    #[test]
    fn test_num_locals_and_parameters() {
        let bytecode = compile_source("fn(a, b) { let c = a; let c = b; let d = c; d }").unwrap();
        let Object::CompiledFunction(func) = &bytecode.constants[0] else {
            panic!("expected compiled function");
        };
        assert_eq!(func.num_parameters, 2);
        assert_eq!(func.num_locals, 4);
        assert_eq!(func.name, None);
    }

    #[test]
    fn test_builtins() {
        assert_compiles(
            "len([]); push([], 1);",
            vec![Int(1)],
            vec![
                op1(GetBuiltin, 0),
                op1(Array, 0),
                op1(Call, 1),
                op(Pop),
                op1(GetBuiltin, 5),
                op1(Array, 0),
                op1(Constant, 0),
                op1(Call, 2),
                op(Pop),
            ],
        );
        assert_compiles(
            "fn() { len([]) }",
            vec![Function(vec![
                op1(GetBuiltin, 0),
                op1(Array, 0),
                op1(Call, 1),
                op(ReturnValue),
            ])],
            vec![make(Closure, &[0, 0]), op(Pop)],
        );
    }

    #[test]
    fn test_closures() {
        assert_compiles(
            "fn(a) { fn(b) { a + b } }",
            vec![
                Function(vec![
                    op1(GetFree, 0),
                    op1(GetLocal, 0),
                    op(Add),
                    op(ReturnValue),
                ]),
                Function(vec![op1(GetLocal, 0), make(Closure, &[0, 1]), op(ReturnValue)]),
            ],
            vec![make(Closure, &[1, 0]), op(Pop)],
        );
        assert_compiles(
            "fn(a) { fn(b) { fn(c) { a + b + c } } };",
            vec![
                Function(vec![
                    op1(GetFree, 0),
                    op1(GetFree, 1),
                    op(Add),
                    op1(GetLocal, 0),
                    op(Add),
                    op(ReturnValue),
                ]),
                Function(vec![
                    op1(GetFree, 0),
                    op1(GetLocal, 0),
                    make(Closure, &[0, 2]),
                    op(ReturnValue),
                ]),
                Function(vec![op1(GetLocal, 0), make(Closure, &[1, 1]), op(ReturnValue)]),
            ],
            vec![make(Closure, &[2, 0]), op(Pop)],
        );
    }

    #[test]
    fn test_closures_mixing_scopes() {
        assert_compiles(
            "let global = 55;
             fn() {
                 let a = 66;
                 fn() {
                     let b = 77;
                     fn() { let c = 88; global + a + b + c; }
                 }
             }",
            vec![
                Int(55),
                Int(66),
                Int(77),
                Int(88),
                Function(vec![
                    op1(Constant, 3),
                    op1(SetLocal, 0),
                    op1(GetGlobal, 0),
                    op1(GetFree, 0),
                    op(Add),
                    op1(GetFree, 1),
                    op(Add),
                    op1(GetLocal, 0),
                    op(Add),
                    op(ReturnValue),
                ]),
                Function(vec![
                    op1(Constant, 2),
                    op1(SetLocal, 0),
                    op1(GetFree, 0),
                    op1(GetLocal, 0),
                    make(Closure, &[4, 2]),
                    op(ReturnValue),
                ]),
                Function(vec![
                    op1(Constant, 1),
                    op1(SetLocal, 0),
                    op1(GetLocal, 0),
                    make(Closure, &[5, 1]),
                    op(ReturnValue),
                ]),
            ],
            vec![
                op1(Constant, 0),
                op1(SetGlobal, 0),
                make(Closure, &[6, 0]),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_recursive_functions() {
        assert_compiles(
            "let countDown = fn(x) { countDown(x - 1); }; countDown(1);",
            vec![
                Int(1),
                Function(vec![
                    op(CurrentClosure),
                    op1(GetLocal, 0),
                    op1(Constant, 0),
                    op(Sub),
                    op1(Call, 1),
                    op(ReturnValue),
                ]),
                Int(1),
            ],
            vec![
                make(Closure, &[1, 0]),
                op1(SetGlobal, 0),
                op1(GetGlobal, 0),
                op1(Constant, 2),
                op1(Call, 1),
                op(Pop),
            ],
        );
        assert_compiles(
            "let wrapper = fn() { let countDown = fn(x) { countDown(x - 1); }; countDown(1); }; wrapper();",
            vec![
                Int(1),
                Function(vec![
                    op(CurrentClosure),
                    op1(GetLocal, 0),
                    op1(Constant, 0),
                    op(Sub),
                    op1(Call, 1),
                    op(ReturnValue),
                ]),
                Int(1),
                Function(vec![
                    make(Closure, &[1, 0]),
                    op1(SetLocal, 0),
                    op1(GetLocal, 0),
                    op1(Constant, 2),
                    op1(Call, 1),
                    op(ReturnValue),
                ]),
            ],
            vec![
                make(Closure, &[3, 0]),
                op1(SetGlobal, 0),
                op1(GetGlobal, 0),
                op1(Call, 0),
                op(Pop),
            ],
        );
    }

    #[test]
    fn test_function_name_is_recorded() {
        let bytecode = compile_source("let answer = fn() { 42 };").unwrap();
        let Object::CompiledFunction(func) = &bytecode.constants[1] else {
            panic!("expected compiled function");
        };
        assert_eq!(func.name.as_deref(), Some("answer"));
    }

    #[test]
    fn test_top_level_return() {
        assert_compiles(
            "return 1;",
            vec![Int(1)],
            vec![op1(Constant, 0), op(ReturnValue)],
        );
    }

    // ============================================================
    // Errors and state
    // ============================================================

    #[test]
    fn test_undefined_variable() {
        assert_eq!(
            compile_source("x + 1").unwrap_err(),
            CompileError::UndefinedVariable("x".to_string())
        );
        assert_eq!(
            compile_source("let f = fn() { y }").unwrap_err(),
            CompileError::UndefinedVariable("y".to_string())
        );
        assert_eq!(
            compile_source("let x = x;").unwrap_err(),
            CompileError::UndefinedVariable("x".to_string())
        );
    }

    #[test]
    fn test_too_many_arguments() {
        let args = vec!["1"; 256].join(", ");
        let input = format!("len({})", args);
        assert_eq!(
            compile_source(&input).unwrap_err(),
            CompileError::TooManyArguments(256)
        );
    }

    #[test]
    fn test_too_many_locals() {
        let lets: String = (0..257).map(|i| format!("let a{} = {}; ", i, i)).collect();
        let input = format!("fn() {{ {} }}", lets);
        assert_eq!(
            compile_source(&input).unwrap_err(),
            CompileError::TooManyLocals("a256".to_string())
        );
    }

    #[test]
    fn test_compiler_scopes() {
        let mut compiler = Compiler::new();
        compiler.emit(Mul, &[]);

        compiler.enter_scope();
        assert_eq!(compiler.enclosing.len(), 1);
        compiler.emit(Sub, &[]);
        assert_eq!(compiler.scope.instructions.len(), 1);
        assert!(compiler.last_instruction_is(Sub));
        assert!(!compiler.symbol_table.is_global());

        let (instructions, _) = compiler.leave_scope().unwrap();
        assert_eq!(instructions.as_bytes(), &op(Sub)[..]);
        assert_eq!(compiler.enclosing.len(), 0);
        assert!(compiler.symbol_table.is_global());

        compiler.emit(Add, &[]);
        assert_eq!(compiler.scope.instructions.len(), 2);
        assert!(compiler.last_instruction_is(Add));
        assert_eq!(
            compiler.scope.previous_instruction.map(|p| p.opcode),
            Some(Mul)
        );

        assert!(compiler.leave_scope().is_err());
    }

    #[test]
    fn test_state_carries_across_compiles() {
        let mut compiler = Compiler::new();
        compiler
            .compile(&parse_source("let a = 1;").unwrap())
            .unwrap();
        let (symbols, constants) = compiler.into_state();

        let mut compiler = Compiler::with_state(symbols, constants);
        compiler.compile(&parse_source("a + 2").unwrap()).unwrap();
        let bytecode = compiler.bytecode();

        assert_instructions(
            &bytecode.instructions,
            vec![op1(GetGlobal, 0), op1(Constant, 1), op(Add), op(Pop)],
            "a + 2",
        );
        assert_eq!(bytecode.constants.len(), 2);
    }
}
