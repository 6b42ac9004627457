use std::rc::Rc;

use super::object::Closure;
use crate::bytecode::Instructions;

/// One activation: the closure being executed, its instruction pointer and
/// the stack index where its locals begin.
#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Rc<Closure>,
    pub ip: usize,
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Rc<Closure>, base_pointer: usize) -> Self {
        Frame {
            closure,
            ip: 0,
            base_pointer,
        }
    }

    pub fn instructions(&self) -> &Instructions {
        &self.closure.func.instructions
    }

    pub fn name(&self) -> &str {
        self.closure.func.name.as_deref().unwrap_or("<anonymous>")
    }
}
