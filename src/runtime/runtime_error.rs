use super::object::ObjectType;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("stack overflow")]
    StackOverflow,

    #[error("call stack overflow (max {0} frames)")]
    FrameOverflow(usize),

    #[error("unsupported types for binary operation: {left} {op} {right}")]
    TypeMismatch {
        op: &'static str,
        left: ObjectType,
        right: ObjectType,
    },

    #[error("unsupported type for negation: {0}")]
    UnsupportedNegation(ObjectType),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("calling non-function and non-built-in: {0}")]
    NotCallable(ObjectType),

    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArity { want: usize, got: usize },

    #[error("unusable as hash key: {0}")]
    UnhashableKey(ObjectType),

    #[error("index operator not supported: {0}")]
    IndexNotSupported(ObjectType),

    #[error("opcode {0} undefined")]
    UnknownOpcode(u8),

    #[error("global slot {0} exceeds the configured limit")]
    GlobalsOverflow(usize),

    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(usize),

    #[error("malformed bytecode: {0}")]
    MalformedBytecode(String),
}

/// Frames rendered by `Display` before the middle of a deep call stack is
/// elided. The innermost frames and the outermost one are always shown.
const MAX_DISPLAYED_FRAMES: usize = 10;

/// A fatal VM error together with the active call stack, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub call_stack: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.kind)?;

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            let depth = self.call_stack.len();
            if depth <= MAX_DISPLAYED_FRAMES {
                for (i, frame) in self.call_stack.iter().rev().enumerate() {
                    write!(f, "\n    {}: {}", i, frame)?;
                }
            } else {
                let shown = MAX_DISPLAYED_FRAMES - 1;
                for (i, frame) in self.call_stack.iter().rev().take(shown).enumerate() {
                    write!(f, "\n    {}: {}", i, frame)?;
                }
                write!(f, "\n    ... {} frames omitted", depth - MAX_DISPLAYED_FRAMES)?;
                write!(f, "\n    {}: {}", depth - 1, self.call_stack[0])?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        RuntimeError {
            kind,
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        RuntimeError::new(kind)
    }
}
