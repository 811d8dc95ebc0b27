use crate::{builtins::Builtin, flatten, Block, Identifier, Instructions};
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
    sync::Arc,
};

#[derive(Debug, Clone, Default)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    String(Arc<str>),
    #[default]
    Null,
    Array(Arc<Vec<Value>>),
    Hash(Arc<HashMap<HashKey, HashPair>>),
    Error(String),
    Builtin(&'static Builtin),
    CompiledFunction(Arc<CompiledFunction>),
    Closure(Arc<Closure>),
    Function(Arc<Function>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Boolean(_) => "BOOLEAN",
            Value::String(_) => "STRING",
            Value::Null => "NULL",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::Error(_) => "ERROR",
            Value::Builtin(_) => "BUILTIN",
            Value::CompiledFunction(_) => "COMPILED_FUNCTION",
            Value::Closure(_) => "CLOSURE",
            Value::Function(_) => "FUNCTION",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Boolean(value) => *value,
            Value::Null => false,
            _ => true,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// The key this value is stored under in a hash, if it can be one.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Integer(value) => Some(HashKey::Integer(*value)),
            Value::Boolean(value) => Some(HashKey::Boolean(*value)),
            Value::String(value) => {
                let mut hasher = DefaultHasher::new();
                value.hash(&mut hasher);
                Some(HashKey::String(hasher.finish()))
            }
            _ => None,
        }
    }

    pub fn string(value: &str) -> Self {
        Value::String(Arc::from(value))
    }

    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Arc::new(elements))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Null => write!(f, "null"),
            Value::Array(elements) => write!(f, "[{}]", flatten(elements, ", ")),
            Value::Hash(pairs) => {
                let mut pairs = pairs
                    .values()
                    .map(|pair| format!("{}: {}", pair.key, pair.value))
                    .collect::<Vec<_>>();
                pairs.sort();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Value::Error(message) => write!(f, "ERROR: {}", message),
            Value::Builtin(_) => write!(f, "builtin function"),
            Value::CompiledFunction(function) => write!(f, "CompiledFunction[{:p}]", Arc::as_ptr(function)),
            Value::Closure(closure) => write!(f, "Closure[{:p}]", Arc::as_ptr(closure)),
            Value::Function(function) => write!(f, "{}", function),
        }
    }
}

/// Data compares by value. Closures, evaluator functions and built-ins are
/// equal only to themselves.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(left), Value::Integer(right)) => left == right,
            (Value::Boolean(left), Value::Boolean(right)) => left == right,
            (Value::String(left), Value::String(right)) => left == right,
            (Value::Null, Value::Null) => true,
            (Value::Array(left), Value::Array(right)) => left == right,
            (Value::Hash(left), Value::Hash(right)) => left == right,
            (Value::Error(left), Value::Error(right)) => left == right,
            (Value::Builtin(left), Value::Builtin(right)) => left == right,
            (Value::CompiledFunction(left), Value::CompiledFunction(right)) => left == right,
            (Value::Closure(left), Value::Closure(right)) => Arc::ptr_eq(left, right),
            (Value::Function(left), Value::Function(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::string(value)
    }
}

/// Tagged projection of a hashable value. Values equal under `==` always
/// produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Boolean(bool),
    String(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: Arc<CompiledFunction>,
    pub free: Vec<Value>,
}

impl Closure {
    pub fn new(function: Arc<CompiledFunction>, free: Vec<Value>) -> Self {
        Self { function, free }
    }
}

/// A user function of the tree-walking evaluator. `environment` indexes the
/// evaluator's environment arena, so the value only has meaning inside the
/// evaluator that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub parameters: Vec<Identifier>,
    pub body: Block,
    pub environment: usize,
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "fn({}) {{ {} }}", flatten(&self.parameters, ", "), self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_hash_key() {
        let hello1 = Value::string("Hello World");
        let hello2 = Value::string("Hello World");
        let diff1 = Value::string("My name is johnny");
        let diff2 = Value::string("My name is johnny");

        assert_eq!(hello1.hash_key(), hello2.hash_key());
        assert_eq!(diff1.hash_key(), diff2.hash_key());
        assert_ne!(hello1.hash_key(), diff1.hash_key());
    }

    #[test]
    fn test_hash_keys_are_tagged_by_type() {
        assert_eq!(Value::Integer(1).hash_key(), Some(HashKey::Integer(1)));
        assert_eq!(Value::Boolean(true).hash_key(), Some(HashKey::Boolean(true)));
        assert_ne!(Value::Integer(1).hash_key(), Value::Boolean(true).hash_key());
        assert_eq!(Value::Null.hash_key(), None);
        assert_eq!(Value::array(vec![]).hash_key(), None);
        assert_eq!(Value::Error("boom".to_string()).hash_key(), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Boolean(true).is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::string("").is_truthy());
    }

    #[test]
    fn test_display() {
        let tests = [
            (Value::Integer(-5), "-5"),
            (Value::Boolean(false), "false"),
            (Value::string("monkey"), "monkey"),
            (Value::Null, "null"),
            (
                Value::array(vec![Value::Integer(1), Value::string("two"), Value::Null]),
                "[1, two, null]",
            ),
            (Value::Error("type mismatch".to_string()), "ERROR: type mismatch"),
        ];

        for (value, expected) in tests {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn test_hash_display() {
        let mut pairs = HashMap::new();
        for (key, value) in [(Value::Integer(2), "b"), (Value::Integer(1), "a")] {
            let hash_key = key.hash_key().unwrap();
            pairs.insert(
                hash_key,
                HashPair {
                    key,
                    value: Value::string(value),
                },
            );
        }
        assert_eq!(Value::Hash(Arc::new(pairs)).to_string(), "{1: a, 2: b}");
    }

    #[test]
    fn test_functions_compare_by_identity() {
        let function = Arc::new(CompiledFunction::default());
        let closure = Value::Closure(Arc::new(Closure::new(function.clone(), vec![])));
        let twin = Value::Closure(Arc::new(Closure::new(function.clone(), vec![])));

        assert_eq!(closure, closure.clone());
        assert_ne!(closure, twin);
        assert_eq!(
            Value::CompiledFunction(function),
            Value::CompiledFunction(Arc::new(CompiledFunction::default()))
        );
        assert_eq!(
            Value::array(vec![Value::Integer(1), Value::string("a")]),
            Value::array(vec![Value::Integer(1), Value::string("a")])
        );
        assert_ne!(Value::Integer(1), Value::Boolean(true));
    }

    #[test]
    fn test_values_are_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Value>();
    }
}
