use std::io::{self, Write};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, instrument, trace};

use super::builtins::BUILTINS;
use super::frame::Frame;
use super::object::{Builtin, Closure, CompiledFunction, HashObject, HashPair, NULL, Object};
use super::runtime_error::{RuntimeError, RuntimeErrorKind};
use crate::bytecode::Bytecode;
use crate::bytecode::op::{Opcode, read_u16};

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Operand stack capacity, in slots.
    pub stack_size: usize,
    /// Maximum call depth, the main frame included.
    pub max_frames: usize,
    /// Number of addressable global slots.
    pub globals_size: usize,
    pub max_steps: Option<usize>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_size: 2048,
            max_frames: 1024,
            globals_size: 65536,
            max_steps: None,
        }
    }
}

impl VmConfig {
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Stack machine executing one [`Bytecode`].
///
/// The operand stack has a fixed capacity and `sp` always points at the next
/// free slot, so `stack[sp]` is the value most recently popped. The frame
/// being executed lives in `frame`; `frames` holds its callers.
pub struct Vm {
    constants: Vec<Object>,
    stack: Vec<Object>,
    sp: usize,
    globals: Vec<Object>,
    frame: Frame,
    frames: Vec<Frame>,
    config: VmConfig,
    steps: usize,
    output: Box<dyn Write>,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Self::with_config(bytecode, VmConfig::default())
    }

    pub fn with_config(bytecode: Bytecode, config: VmConfig) -> Self {
        let main_fn = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
            name: None,
        };
        let main_closure = Rc::new(Closure {
            func: Rc::new(main_fn),
            free: Vec::new(),
        });

        Vm {
            constants: bytecode.constants,
            stack: vec![NULL; config.stack_size],
            sp: 0,
            globals: Vec::new(),
            frame: Frame::new(main_closure, 0),
            frames: Vec::new(),
            config,
            steps: 0,
            output: Box::new(io::stdout()),
        }
    }

    /// Creates a VM that continues with globals left behind by a previous run.
    pub fn with_globals(bytecode: Bytecode, globals: Vec<Object>) -> Self {
        let mut vm = Self::new(bytecode);
        vm.globals = globals;
        vm
    }

    /// Redirects built-in output (`puts`) to `output`.
    pub fn with_output(mut self, output: impl Write + 'static) -> Self {
        self.output = Box::new(output);
        self
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// The value most recently popped off the operand stack.
    pub fn last_popped(&self) -> &Object {
        self.stack.get(self.sp).unwrap_or(&NULL)
    }

    pub fn stack_top(&self) -> Option<&Object> {
        self.sp.checked_sub(1).and_then(|i| self.stack.get(i))
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    #[instrument(skip_all, fields(constants = self.constants.len()))]
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        while self.frame.ip < self.frame.instructions().len() {
            self.check_limits()?;

            let ip = self.frame.ip;
            let byte = self.frame.instructions()[ip];
            let op = Opcode::try_from(byte)
                .map_err(|e| self.error(RuntimeErrorKind::UnknownOpcode(e.0)))?;
            self.frame.ip += 1;

            trace!(ip, op = op.name(), sp = self.sp, "dispatch");

            match op {
                Opcode::Constant => {
                    let index = self.read_u16_operand()?;
                    let constant = self.constant(index)?;
                    self.push(constant)?;
                }
                Opcode::Null => self.push(NULL)?,
                Opcode::True => self.push(Object::native_bool(true))?,
                Opcode::False => self.push(Object::native_bool(false))?,

                Opcode::Array => {
                    let count = self.read_u16_operand()?;
                    let elements = self.take(count)?;
                    self.push(Object::array(elements))?;
                }
                Opcode::Hash => {
                    let pairs = self.read_u16_operand()?;
                    let items = self.take(pairs * 2)?;
                    let hash = self.build_hash(items)?;
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    let result = self.execute_index(&left, &index)?;
                    self.push(result)?;
                }

                Opcode::Call => {
                    let num_args = self.read_u8_operand()?;
                    self.execute_call(num_args)?;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    if self.frames.is_empty() {
                        debug!("top-level return");
                        self.halt_with(value);
                        return Ok(());
                    }
                    let frame = self.leave_frame()?;
                    self.sp = frame.base_pointer - 1;
                    self.push(value)?;
                }
                Opcode::Return => {
                    if self.frames.is_empty() {
                        self.halt_with(NULL);
                        return Ok(());
                    }
                    let frame = self.leave_frame()?;
                    self.sp = frame.base_pointer - 1;
                    self.push(NULL)?;
                }

                Opcode::GetLocal => {
                    let slot = self.read_u8_operand()?;
                    let index = self.local_index(slot)?;
                    let value = self.stack[index].clone();
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let slot = self.read_u8_operand()?;
                    let index = self.local_index(slot)?;
                    let value = self.pop()?;
                    self.stack[index] = value;
                }
                Opcode::GetGlobal => {
                    let slot = self.read_u16_operand()?;
                    let value = self.globals.get(slot).cloned().unwrap_or(NULL);
                    self.push(value)?;
                }
                Opcode::SetGlobal => {
                    let slot = self.read_u16_operand()?;
                    let value = self.pop()?;
                    self.set_global(slot, value)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_u8_operand()?;
                    let builtin: &'static Builtin = BUILTINS.get(index).ok_or_else(|| {
                        self.malformed(format!("built-in index {} out of range", index))
                    })?;
                    self.push(Object::Builtin(builtin))?;
                }
                Opcode::GetFree => {
                    let index = self.read_u8_operand()?;
                    let value = self.frame.closure.free.get(index).cloned().ok_or_else(|| {
                        self.malformed(format!("free variable {} out of range", index))
                    })?;
                    self.push(value)?;
                }

                Opcode::Closure => {
                    let index = self.read_u16_operand()?;
                    let num_free = self.read_u8_operand()?;
                    self.push_closure(index, num_free)?;
                }
                Opcode::CurrentClosure => {
                    let current = Rc::clone(&self.frame.closure);
                    self.push(Object::Closure(current))?;
                }

                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = self.execute_binary_operation(op, &left, &right)?;
                    self.push(result)?;
                }

                Opcode::Minus => {
                    let operand = self.pop()?;
                    let result = match operand {
                        Object::Integer(n) => n
                            .checked_neg()
                            .map(Object::Integer)
                            .ok_or_else(|| self.error(RuntimeErrorKind::IntegerOverflow))?,
                        other => {
                            return Err(self.error(RuntimeErrorKind::UnsupportedNegation(
                                other.object_type(),
                            )));
                        }
                    };
                    self.push(result)?;
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    self.push(Object::native_bool(!operand.is_truthy()))?;
                }

                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan | Opcode::LessThan => {
                    let right = self.pop()?;
                    let left = self.pop()?;
                    let result = self.execute_comparison(op, &left, &right)?;
                    self.push(result)?;
                }

                Opcode::JumpNotTruthy => {
                    let target = self.read_u16_operand()?;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.frame.ip = target;
                    }
                }
                Opcode::Jump => {
                    let target = self.read_u16_operand()?;
                    self.frame.ip = target;
                }

                Opcode::Pop => {
                    self.pop()?;
                }
            }
        }

        Ok(())
    }

    /// Ends a top-level run: the operand stack is emptied and `value` becomes
    /// the last popped value.
    fn halt_with(&mut self, value: Object) {
        self.sp = 0;
        if let Some(slot) = self.stack.first_mut() {
            *slot = value;
        }
    }

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(self.error(RuntimeErrorKind::StepLimitExceeded(max)));
            }
        }

        Ok(())
    }

    // Errors

    fn error(&self, kind: RuntimeErrorKind) -> RuntimeError {
        let callers = self.frames.iter().chain(std::iter::once(&self.frame));
        callers
            .enumerate()
            .fold(RuntimeError::new(kind), |err, (depth, frame)| {
                if depth == 0 {
                    err.with_context("<main>")
                } else {
                    err.with_context(frame.name())
                }
            })
    }

    fn malformed(&self, message: String) -> RuntimeError {
        self.error(RuntimeErrorKind::MalformedBytecode(message))
    }

    // Operand decoding

    fn read_u16_operand(&mut self) -> Result<usize, RuntimeError> {
        let ip = self.frame.ip;
        let bytes = self
            .frame
            .instructions()
            .get(ip..)
            .and_then(|rest| rest.first_chunk::<2>())
            .ok_or_else(|| self.malformed(format!("truncated operand at {}", ip)))?;
        let value = read_u16(bytes) as usize;
        self.frame.ip += 2;
        Ok(value)
    }

    fn read_u8_operand(&mut self) -> Result<usize, RuntimeError> {
        let ip = self.frame.ip;
        let value = *self
            .frame
            .instructions()
            .get(ip)
            .ok_or_else(|| self.malformed(format!("truncated operand at {}", ip)))?;
        self.frame.ip += 1;
        Ok(value as usize)
    }

    fn constant(&self, index: usize) -> Result<Object, RuntimeError> {
        self.constants
            .get(index)
            .cloned()
            .ok_or_else(|| self.malformed(format!("constant {} out of range", index)))
    }

    // Stack

    fn push(&mut self, object: Object) -> Result<(), RuntimeError> {
        if self.sp >= self.config.stack_size {
            return Err(self.error(RuntimeErrorKind::StackOverflow));
        }

        self.stack[self.sp] = object;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Object, RuntimeError> {
        if self.sp == 0 {
            return Err(self.malformed("stack underflow".to_string()));
        }

        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }

    /// Pops the top `count` values, returning them in push order.
    fn take(&mut self, count: usize) -> Result<Vec<Object>, RuntimeError> {
        let start = self
            .sp
            .checked_sub(count)
            .ok_or_else(|| self.malformed("stack underflow".to_string()))?;
        let values = self.stack[start..self.sp].to_vec();
        self.sp = start;
        Ok(values)
    }

    fn local_index(&self, slot: usize) -> Result<usize, RuntimeError> {
        let index = self.frame.base_pointer + slot;
        if index >= self.sp {
            return Err(self.malformed(format!("local slot {} out of range", slot)));
        }
        Ok(index)
    }

    fn set_global(&mut self, slot: usize, value: Object) -> Result<(), RuntimeError> {
        if slot >= self.config.globals_size {
            return Err(self.error(RuntimeErrorKind::GlobalsOverflow(slot)));
        }
        if slot >= self.globals.len() {
            self.globals.resize(slot + 1, NULL);
        }
        self.globals[slot] = value;
        Ok(())
    }

    // Frames

    fn leave_frame(&mut self) -> Result<Frame, RuntimeError> {
        let caller = self
            .frames
            .pop()
            .ok_or_else(|| self.malformed("return outside of a call".to_string()))?;
        let frame = std::mem::replace(&mut self.frame, caller);
        debug!(function = frame.name(), depth = self.frames.len() + 1, "leave frame");
        Ok(frame)
    }

    fn execute_call(&mut self, num_args: usize) -> Result<(), RuntimeError> {
        let callee_index = self
            .sp
            .checked_sub(num_args + 1)
            .ok_or_else(|| self.malformed("stack underflow".to_string()))?;

        match self.stack[callee_index].clone() {
            Object::Closure(closure) => self.call_closure(closure, num_args),
            Object::Builtin(builtin) => self.call_builtin(builtin, num_args),
            other => Err(self.error(RuntimeErrorKind::NotCallable(other.object_type()))),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> Result<(), RuntimeError> {
        let func = &closure.func;
        if num_args != func.num_parameters {
            return Err(self.error(RuntimeErrorKind::WrongArity {
                want: func.num_parameters,
                got: num_args,
            }));
        }

        if self.frames.len() + 1 >= self.config.max_frames {
            return Err(self.error(RuntimeErrorKind::FrameOverflow(self.config.max_frames)));
        }

        let base_pointer = self.sp - num_args;
        let new_sp = base_pointer + func.num_locals.max(num_args);
        if new_sp > self.config.stack_size {
            return Err(self.error(RuntimeErrorKind::StackOverflow));
        }

        for slot in &mut self.stack[self.sp..new_sp] {
            *slot = NULL;
        }

        let callee = Frame::new(closure, base_pointer);
        let caller = std::mem::replace(&mut self.frame, callee);
        self.frames.push(caller);
        self.sp = new_sp;

        debug!(
            function = self.frame.name(),
            depth = self.frames.len() + 1,
            base_pointer,
            "enter frame"
        );
        Ok(())
    }

    fn call_builtin(&mut self, builtin: &'static Builtin, num_args: usize) -> Result<(), RuntimeError> {
        let args = &self.stack[self.sp - num_args..self.sp];
        let result = (builtin.func)(args, &mut *self.output);

        trace!(builtin = builtin.name, num_args, "builtin call");

        self.sp = self.sp - num_args - 1;
        self.push(result)
    }

    fn push_closure(&mut self, index: usize, num_free: usize) -> Result<(), RuntimeError> {
        let func = match self.constant(index)? {
            Object::CompiledFunction(func) => func,
            other => {
                return Err(self.malformed(format!(
                    "constant {} is not a function: {}",
                    index,
                    other.object_type()
                )));
            }
        };

        let free = self.take(num_free)?;
        self.push(Object::Closure(Rc::new(Closure { func, free })))
    }

    // Operators

    fn execute_binary_operation(
        &self,
        op: Opcode,
        left: &Object,
        right: &Object,
    ) -> Result<Object, RuntimeError> {
        match (left, right) {
            (Object::Integer(a), Object::Integer(b)) => {
                let (a, b) = (*a, *b);
                let result = match op {
                    Opcode::Add => a.checked_add(b),
                    Opcode::Sub => a.checked_sub(b),
                    Opcode::Mul => a.checked_mul(b),
                    _ => {
                        if b == 0 {
                            return Err(self.error(RuntimeErrorKind::DivisionByZero));
                        }
                        a.checked_div(b)
                    }
                };
                result
                    .map(Object::Integer)
                    .ok_or_else(|| self.error(RuntimeErrorKind::IntegerOverflow))
            }
            (Object::String(a), Object::String(b)) if op == Opcode::Add => {
                let mut joined = String::with_capacity(a.len() + b.len());
                joined.push_str(a);
                joined.push_str(b);
                Ok(Object::string(joined))
            }
            _ => Err(self.type_mismatch(op, left, right)),
        }
    }

    fn execute_comparison(
        &self,
        op: Opcode,
        left: &Object,
        right: &Object,
    ) -> Result<Object, RuntimeError> {
        match op {
            Opcode::Equal => Ok(Object::native_bool(objects_equal(left, right))),
            Opcode::NotEqual => Ok(Object::native_bool(!objects_equal(left, right))),
            _ => match (left, right) {
                (Object::Integer(a), Object::Integer(b)) if op == Opcode::LessThan => {
                    Ok(Object::native_bool(a < b))
                }
                (Object::Integer(a), Object::Integer(b)) => Ok(Object::native_bool(a > b)),
                _ => Err(self.type_mismatch(op, left, right)),
            },
        }
    }

    fn type_mismatch(&self, op: Opcode, left: &Object, right: &Object) -> RuntimeError {
        let symbol = match op {
            Opcode::Add => "+",
            Opcode::Sub => "-",
            Opcode::Mul => "*",
            Opcode::Div => "/",
            Opcode::GreaterThan => ">",
            Opcode::LessThan => "<",
            _ => op.name(),
        };
        self.error(RuntimeErrorKind::TypeMismatch {
            op: symbol,
            left: left.object_type(),
            right: right.object_type(),
        })
    }

    fn execute_index(&self, left: &Object, index: &Object) -> Result<Object, RuntimeError> {
        match (left, index) {
            (Object::Array(elements), Object::Integer(i)) => Ok(usize::try_from(*i)
                .ok()
                .and_then(|i| elements.get(i))
                .cloned()
                .unwrap_or(NULL)),
            (Object::Hash(hash), key) => {
                let key = key.hash_key().ok_or_else(|| {
                    self.error(RuntimeErrorKind::UnhashableKey(key.object_type()))
                })?;
                Ok(hash.get(&key).cloned().unwrap_or(NULL))
            }
            (other, _) => Err(self.error(RuntimeErrorKind::IndexNotSupported(other.object_type()))),
        }
    }

    fn build_hash(&self, items: Vec<Object>) -> Result<Object, RuntimeError> {
        let mut pairs = IndexMap::with_capacity(items.len() / 2);
        let mut items = items.into_iter();

        while let (Some(key), Some(value)) = (items.next(), items.next()) {
            let hash_key = key
                .hash_key()
                .ok_or_else(|| self.error(RuntimeErrorKind::UnhashableKey(key.object_type())))?;
            pairs.insert(hash_key, HashPair { key, value });
        }

        Ok(Object::Hash(Rc::new(HashObject { pairs })))
    }
}

/// `==` semantics: integers and strings by value, booleans and null by
/// variant, everything heap-allocated by identity.
fn objects_equal(left: &Object, right: &Object) -> bool {
    match (left, right) {
        (Object::Integer(a), Object::Integer(b)) => a == b,
        (Object::String(a), Object::String(b)) => a == b,
        (Object::Boolean(a), Object::Boolean(b)) => a == b,
        (Object::Null, Object::Null) => true,
        (Object::Array(a), Object::Array(b)) => Rc::ptr_eq(a, b),
        (Object::Hash(a), Object::Hash(b)) => Rc::ptr_eq(a, b),
        (Object::CompiledFunction(a), Object::CompiledFunction(b)) => Rc::ptr_eq(a, b),
        (Object::Closure(a), Object::Closure(b)) => Rc::ptr_eq(a, b),
        (Object::Builtin(a), Object::Builtin(b)) => std::ptr::eq(*a, *b),
        (Object::Error(a), Object::Error(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}
