pub mod builtins;
pub mod frame;
pub mod object;
pub mod runtime_error;
pub mod vm;

pub use object::Object;
pub use runtime_error::{RuntimeError, RuntimeErrorKind};
pub use vm::{Vm, VmConfig};
