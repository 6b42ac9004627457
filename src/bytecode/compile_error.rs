#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("compile error: undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("compile error: constant pool exceeds {} entries", u16::MAX as usize + 1)]
    TooManyConstants,

    #[error("compile error: global '{0}' exceeds {} global slots", u16::MAX as usize + 1)]
    TooManyGlobals(String),

    #[error("compile error: local '{0}' exceeds {} local slots", u8::MAX as usize + 1)]
    TooManyLocals(String),

    #[error("compile error: function captures {0} variables, at most {} allowed", u8::MAX)]
    TooManyFreeVariables(usize),

    #[error("compile error: {0} arguments in call, at most {} allowed", u8::MAX)]
    TooManyArguments(usize),

    #[error("compile error: function declares {0} parameters, at most {} allowed", u8::MAX)]
    TooManyParameters(usize),

    #[error("compile error: {kind} literal with {count} entries, at most {} allowed", u16::MAX)]
    LiteralTooLarge { kind: &'static str, count: usize },

    #[error("compile error: jump target {0} out of range")]
    JumpOutOfRange(usize),

    /// Internal compiler error (shouldn't happen in normal use)
    #[error("compile error: internal: {0}")]
    Internal(String),
}
