use std::fmt;
use std::io::Write;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::Instructions;

/// Native function signature for built-ins.
///
/// Built-ins receive their arguments and the host output sink, and report
/// usage problems by returning [`Object::Error`] rather than failing the VM.
pub type BuiltinFn = fn(&[Object], &mut dyn Write) -> Object;

/// Runtime value in the Monkey language.
///
/// Heap-backed variants are reference counted, so cloning an object never
/// copies its contents.
#[derive(Debug, Clone)]
pub enum Object {
    /// 64-bit signed integer.
    Integer(i64),

    /// One of the two boolean singletons, [`TRUE`] and [`FALSE`].
    Boolean(bool),

    /// Immutable UTF-8 string.
    String(Rc<str>),

    /// The null singleton, [`NULL`].
    Null,

    /// Array literal value: `[1, 2, 3]`.
    Array(Rc<Vec<Object>>),

    /// Hash literal value: `{"a": 1}`.
    Hash(Rc<HashObject>),

    /// A function body as emitted by the compiler. Only ever lives in the
    /// constant pool; the VM wraps it into a [`Closure`] before calling.
    CompiledFunction(Rc<CompiledFunction>),

    Closure(Rc<Closure>),

    Builtin(&'static Builtin),

    /// A first-class error value produced by a built-in.
    Error(Rc<str>),
}

pub const TRUE: Object = Object::Boolean(true);
pub const FALSE: Object = Object::Boolean(false);
pub const NULL: Object = Object::Null;

/// Type tag of an [`Object`], rendered the way error messages name types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Integer,
    Boolean,
    String,
    Null,
    Array,
    Hash,
    CompiledFunction,
    Closure,
    Builtin,
    Error,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::Integer => "INTEGER",
            ObjectType::Boolean => "BOOLEAN",
            ObjectType::String => "STRING",
            ObjectType::Null => "NULL",
            ObjectType::Array => "ARRAY",
            ObjectType::Hash => "HASH",
            ObjectType::CompiledFunction => "COMPILED_FUNCTION",
            ObjectType::Closure => "CLOSURE",
            ObjectType::Builtin => "BUILTIN",
            ObjectType::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

/// Structural key for hash objects.
///
/// The key carries the value together with its type, so `1`, `true` and
/// `"1"` can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Boolean(bool),
    String(Rc<str>),
}

/// A stored hash entry; the original key object is kept for rendering.
#[derive(Debug, Clone)]
pub struct HashPair {
    pub key: Object,
    pub value: Object,
}

#[derive(Debug, Clone, Default)]
pub struct HashObject {
    pub pairs: IndexMap<HashKey, HashPair>,
}

impl HashObject {
    pub fn get(&self, key: &HashKey) -> Option<&Object> {
        self.pairs.get(key).map(|pair| &pair.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    /// Local slots to reserve on call, parameters included.
    pub num_locals: usize,
    pub num_parameters: usize,
    /// Binding name when the literal was the value of a `let`.
    pub name: Option<String>,
}

/// A callable function value together with the free variables it captured.
#[derive(Debug, Clone)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Object>,
}

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).finish()
    }
}

impl Object {
    pub fn string(s: impl Into<Rc<str>>) -> Object {
        Object::String(s.into())
    }

    pub fn array(elements: Vec<Object>) -> Object {
        Object::Array(Rc::new(elements))
    }

    pub fn error(message: impl Into<String>) -> Object {
        Object::Error(Rc::from(message.into()))
    }

    /// Returns the shared boolean singleton for `value`.
    pub fn native_bool(value: bool) -> Object {
        if value { TRUE } else { FALSE }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            Object::Integer(_) => ObjectType::Integer,
            Object::Boolean(_) => ObjectType::Boolean,
            Object::String(_) => ObjectType::String,
            Object::Null => ObjectType::Null,
            Object::Array(_) => ObjectType::Array,
            Object::Hash(_) => ObjectType::Hash,
            Object::CompiledFunction(_) => ObjectType::CompiledFunction,
            Object::Closure(_) => ObjectType::Closure,
            Object::Builtin(_) => ObjectType::Builtin,
            Object::Error(_) => ObjectType::Error,
        }
    }

    /// Only `false` and `null` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Object::Boolean(false) | Object::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Object::Error(_))
    }

    /// Derives the hash key for integers, booleans and strings; every other
    /// type is unhashable.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Object::Integer(n) => Some(HashKey::Integer(*n)),
            Object::Boolean(b) => Some(HashKey::Boolean(*b)),
            Object::String(s) => Some(HashKey::String(Rc::clone(s))),
            Object::Null
            | Object::Array(_)
            | Object::Hash(_)
            | Object::CompiledFunction(_)
            | Object::Closure(_)
            | Object::Builtin(_)
            | Object::Error(_) => None,
        }
    }
}

/// Structural comparison used by tests and hosts.
///
/// Functions, closures and built-ins compare by identity. The VM's `==`
/// operator has its own rules and does not go through this impl.
impl PartialEq for Object {
    fn eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::String(a), Object::String(b)) => a == b,
            (Object::Null, Object::Null) => true,
            (Object::Array(a), Object::Array(b)) => a == b,
            (Object::Hash(a), Object::Hash(b)) => {
                a.pairs.len() == b.pairs.len()
                    && a.pairs
                        .iter()
                        .all(|(key, pair)| b.get(key) == Some(&pair.value))
            }
            (Object::CompiledFunction(a), Object::CompiledFunction(b)) => Rc::ptr_eq(a, b),
            (Object::Closure(a), Object::Closure(b)) => Rc::ptr_eq(a, b),
            (Object::Builtin(a), Object::Builtin(b)) => std::ptr::eq(*a, *b),
            (Object::Error(a), Object::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Integer(n) => write!(f, "{}", n),
            Object::Boolean(b) => write!(f, "{}", b),
            Object::String(s) => write!(f, "{}", s),
            Object::Null => write!(f, "null"),
            Object::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            }
            Object::Hash(hash) => {
                write!(f, "{{")?;
                for (i, pair) in hash.pairs.values().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", pair.key, pair.value)?;
                }
                write!(f, "}}")
            }
            Object::CompiledFunction(_) => write!(f, "<compiled fn>"),
            Object::Closure(closure) => match &closure.func.name {
                Some(name) => write!(f, "<closure {}>", name),
                None => write!(f, "<closure>"),
            },
            Object::Builtin(builtin) => write!(f, "<builtin {}>", builtin.name),
            Object::Error(message) => write!(f, "ERROR: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_hash_key() {
        let hello1 = Object::string("Hey!");
        let hello2 = Object::string("Hey!");
        let diff1 = Object::string("J");
        let diff2 = Object::string("J");

        assert_eq!(hello1.hash_key(), hello2.hash_key());
        assert_eq!(diff1.hash_key(), diff2.hash_key());
        assert_ne!(hello1.hash_key(), diff1.hash_key());
    }

    #[test]
    fn test_integer_hash_key() {
        assert_eq!(Object::Integer(1).hash_key(), Object::Integer(1).hash_key());
        assert_eq!(Object::Integer(-21).hash_key(), Object::Integer(-21).hash_key());
        assert_ne!(Object::Integer(1).hash_key(), Object::Integer(-21).hash_key());
    }

    #[test]
    fn test_boolean_hash_key() {
        assert_eq!(TRUE.hash_key(), Object::Boolean(true).hash_key());
        assert_eq!(FALSE.hash_key(), Object::Boolean(false).hash_key());
        assert_ne!(TRUE.hash_key(), FALSE.hash_key());
    }

    #[test]
    fn test_hash_keys_encode_type() {
        assert_ne!(Object::Integer(1).hash_key(), TRUE.hash_key());
        assert_ne!(Object::Integer(1).hash_key(), Object::string("1").hash_key());
        assert_ne!(Object::Integer(0).hash_key(), FALSE.hash_key());
    }

    #[test]
    fn test_unhashable_objects() {
        let unhashable = [
            NULL,
            Object::array(vec![Object::Integer(1)]),
            Object::Hash(Rc::new(HashObject::default())),
            Object::error("boom"),
            Object::CompiledFunction(Rc::new(CompiledFunction {
                instructions: Instructions::new(),
                num_locals: 0,
                num_parameters: 0,
                name: None,
            })),
        ];
        for object in unhashable {
            assert_eq!(object.hash_key(), None, "{:?}", object);
        }
    }

    #[test]
    fn test_truthiness() {
        assert!(!FALSE.is_truthy());
        assert!(!NULL.is_truthy());
        assert!(TRUE.is_truthy());
        assert!(Object::Integer(0).is_truthy());
        assert!(Object::string("").is_truthy());
        assert!(Object::array(vec![]).is_truthy());
    }

    #[test]
    fn test_display() {
        let mut pairs = IndexMap::new();
        pairs.insert(
            HashKey::String(Rc::from("a")),
            HashPair {
                key: Object::string("a"),
                value: Object::Integer(1),
            },
        );
        pairs.insert(
            HashKey::Integer(2),
            HashPair {
                key: Object::Integer(2),
                value: TRUE,
            },
        );

        assert_eq!(Object::Integer(-3).to_string(), "-3");
        assert_eq!(NULL.to_string(), "null");
        assert_eq!(Object::string("hi").to_string(), "hi");
        assert_eq!(
            Object::array(vec![Object::Integer(1), Object::string("x"), NULL]).to_string(),
            "[1, x, null]"
        );
        assert_eq!(
            Object::Hash(Rc::new(HashObject { pairs })).to_string(),
            "{a: 1, 2: true}"
        );
        assert_eq!(Object::error("bad").to_string(), "ERROR: bad");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Object::Integer(1).object_type().to_string(), "INTEGER");
        assert_eq!(Object::array(vec![]).object_type().to_string(), "ARRAY");
        assert_eq!(NULL.object_type().to_string(), "NULL");
    }
}
