use std::ops::Deref;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::runtime::object::{CompiledFunction, Object, ObjectType};

/// A flat, big-endian encoded instruction stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Appends an encoded instruction and returns its starting offset.
    pub fn push_instruction(&mut self, bytes: &[u8]) -> usize {
        let position = self.0.len();
        self.0.extend_from_slice(bytes);
        position
    }

    /// Overwrites bytes in place starting at `position`.
    pub fn overwrite(&mut self, position: usize, bytes: &[u8]) {
        self.0[position..position + bytes.len()].copy_from_slice(bytes);
    }

    pub fn truncate(&mut self, len: usize) {
        self.0.truncate(len);
    }
}

impl From<Vec<u8>> for Instructions {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl FromIterator<Vec<u8>> for Instructions {
    fn from_iter<T: IntoIterator<Item = Vec<u8>>>(iter: T) -> Self {
        Self(iter.into_iter().flatten().collect())
    }
}

impl Deref for Instructions {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// Compiler output: the main instruction stream plus its constant pool.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

#[derive(Debug, thiserror::Error)]
pub enum BytecodeError {
    #[error("constant {index} of type {kind} cannot be encoded")]
    UnencodableConstant { index: usize, kind: ObjectType },
    #[error("bytecode encoding failed: {0}")]
    Codec(#[from] postcard::Error),
}

/// Serializable mirror of the constant kinds the compiler emits.
#[derive(Debug, Serialize, Deserialize)]
enum EncodedConstant {
    Integer(i64),
    String(String),
    Function {
        instructions: Instructions,
        num_locals: usize,
        num_parameters: usize,
        name: Option<String>,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedBytecode {
    instructions: Instructions,
    constants: Vec<EncodedConstant>,
}

impl Bytecode {
    pub fn new(instructions: Instructions, constants: Vec<Object>) -> Self {
        Self {
            instructions,
            constants,
        }
    }

    /// Encodes the bytecode to a postcard byte image.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BytecodeError> {
        let constants = self
            .constants
            .iter()
            .enumerate()
            .map(|(index, constant)| match constant {
                Object::Integer(n) => Ok(EncodedConstant::Integer(*n)),
                Object::String(s) => Ok(EncodedConstant::String(s.to_string())),
                Object::CompiledFunction(func) => Ok(EncodedConstant::Function {
                    instructions: func.instructions.clone(),
                    num_locals: func.num_locals,
                    num_parameters: func.num_parameters,
                    name: func.name.clone(),
                }),
                other => Err(BytecodeError::UnencodableConstant {
                    index,
                    kind: other.object_type(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let encoded = EncodedBytecode {
            instructions: self.instructions.clone(),
            constants,
        };
        Ok(postcard::to_allocvec(&encoded)?)
    }

    /// Decodes a byte image produced by [`Bytecode::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BytecodeError> {
        let encoded: EncodedBytecode = postcard::from_bytes(bytes)?;
        let constants = encoded
            .constants
            .into_iter()
            .map(|constant| match constant {
                EncodedConstant::Integer(n) => Object::Integer(n),
                EncodedConstant::String(s) => Object::string(s),
                EncodedConstant::Function {
                    instructions,
                    num_locals,
                    num_parameters,
                    name,
                } => Object::CompiledFunction(Rc::new(CompiledFunction {
                    instructions,
                    num_locals,
                    num_parameters,
                    name,
                })),
            })
            .collect();

        Ok(Self {
            instructions: encoded.instructions,
            constants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::{Opcode, make};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_instructions_collect_and_overwrite() {
        let mut ins: Instructions = vec![
            make(Opcode::Constant, &[1]),
            make(Opcode::Jump, &[0xFFFF]),
        ]
        .into_iter()
        .collect();
        assert_eq!(ins.len(), 6);

        ins.overwrite(3, &make(Opcode::Jump, &[6]));
        assert_eq!(ins.as_bytes(), &[Opcode::Constant as u8, 0, 1, Opcode::Jump as u8, 0, 6]);
    }

    #[test]
    fn test_bytecode_bytes_round_trip() {
        let func = CompiledFunction {
            instructions: make(Opcode::ReturnValue, &[]).into(),
            num_locals: 2,
            num_parameters: 1,
            name: Some("id".to_string()),
        };
        let bytecode = Bytecode::new(
            make(Opcode::Constant, &[0]).into(),
            vec![
                Object::Integer(-7),
                Object::string("hi"),
                Object::CompiledFunction(Rc::new(func.clone())),
            ],
        );

        let bytes = bytecode.to_bytes().unwrap();
        let decoded = Bytecode::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.instructions, bytecode.instructions);
        assert_eq!(decoded.constants.len(), 3);
        assert!(matches!(decoded.constants[0], Object::Integer(-7)));
        assert!(matches!(&decoded.constants[1], Object::String(s) if &**s == "hi"));
        match &decoded.constants[2] {
            Object::CompiledFunction(decoded_fn) => assert_eq!(**decoded_fn, func),
            other => panic!("expected compiled function, got {:?}", other),
        }
    }

    #[test]
    fn test_unencodable_constant() {
        let bytecode = Bytecode::new(Instructions::new(), vec![Object::Integer(1), Object::Null]);
        let err = bytecode.to_bytes().unwrap_err();
        assert!(matches!(
            err,
            BytecodeError::UnencodableConstant {
                index: 1,
                kind: ObjectType::Null
            }
        ));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(matches!(
            Bytecode::from_bytes(&[0xFF, 0xFF, 0xFF]),
            Err(BytecodeError::Codec(_))
        ));
    }
}
