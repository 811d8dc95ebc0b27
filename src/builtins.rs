use crate::Value;
use std::fmt::{self, Debug, Formatter};

pub type BuiltinFn = fn(&[Value]) -> Value;

pub struct Builtin {
    pub name: &'static str,
    pub function: BuiltinFn,
}

impl Builtin {
    pub fn call(&self, arguments: &[Value]) -> Value {
        (self.function)(arguments)
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Debug for Builtin {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

/// Built-ins in the order the compiler numbers them.
pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "len",
        function: len,
    },
    Builtin {
        name: "puts",
        function: puts,
    },
    Builtin {
        name: "first",
        function: first,
    },
    Builtin {
        name: "last",
        function: last,
    },
    Builtin {
        name: "rest",
        function: rest,
    },
    Builtin {
        name: "push",
        function: push,
    },
];

pub fn lookup_builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn error(message: String) -> Value {
    Value::Error(message)
}

fn check_arity(arguments: &[Value], want: usize) -> Option<Value> {
    if arguments.len() != want {
        return Some(error(format!(
            "wrong number of arguments. got={}, want={}",
            arguments.len(),
            want
        )));
    }
    None
}

fn len(arguments: &[Value]) -> Value {
    if let Some(error) = check_arity(arguments, 1) {
        return error;
    }
    match &arguments[0] {
        Value::String(value) => Value::Integer(value.chars().count() as i64),
        Value::Array(elements) => Value::Integer(elements.len() as i64),
        other => error(format!(
            "argument to `len` not supported, got {}",
            other.type_name()
        )),
    }
}

fn puts(arguments: &[Value]) -> Value {
    for argument in arguments {
        println!("{}", argument);
    }
    Value::Null
}

fn first(arguments: &[Value]) -> Value {
    if let Some(error) = check_arity(arguments, 1) {
        return error;
    }
    match &arguments[0] {
        Value::Array(elements) => elements.first().cloned().unwrap_or(Value::Null),
        other => error(format!(
            "argument to `first` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}

fn last(arguments: &[Value]) -> Value {
    if let Some(error) = check_arity(arguments, 1) {
        return error;
    }
    match &arguments[0] {
        Value::Array(elements) => elements.last().cloned().unwrap_or(Value::Null),
        other => error(format!(
            "argument to `last` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}

fn rest(arguments: &[Value]) -> Value {
    if let Some(error) = check_arity(arguments, 1) {
        return error;
    }
    match &arguments[0] {
        Value::Array(elements) if elements.is_empty() => Value::Null,
        Value::Array(elements) => Value::array(elements[1..].to_vec()),
        other => error(format!(
            "argument to `rest` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}

fn push(arguments: &[Value]) -> Value {
    if let Some(error) = check_arity(arguments, 2) {
        return error;
    }
    match &arguments[0] {
        Value::Array(elements) => {
            let mut elements = elements.to_vec();
            elements.push(arguments[1].clone());
            Value::array(elements)
        }
        other => error(format!(
            "argument to `push` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    fn call(name: &str, arguments: &[Value]) -> Result<Value> {
        let builtin = lookup_builtin(name).context("Missing builtin")?;
        Ok(builtin.call(arguments))
    }

    #[test]
    fn test_builtin_order() {
        let names = BUILTINS.iter().map(|b| b.name).collect::<Vec<_>>();
        assert_eq!(names, ["len", "puts", "first", "last", "rest", "push"]);
    }

    #[test]
    fn test_builtins() -> Result<()> {
        let array = Value::array(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        let empty = Value::array(vec![]);

        let tests = [
            ("len", vec![Value::string("")], Value::Integer(0)),
            ("len", vec![Value::string("four")], Value::Integer(4)),
            ("len", vec![array.clone()], Value::Integer(3)),
            (
                "len",
                vec![Value::Integer(1)],
                Value::Error("argument to `len` not supported, got INTEGER".to_string()),
            ),
            (
                "len",
                vec![Value::string("one"), Value::string("two")],
                Value::Error("wrong number of arguments. got=2, want=1".to_string()),
            ),
            ("first", vec![array.clone()], Value::Integer(1)),
            ("first", vec![empty.clone()], Value::Null),
            (
                "first",
                vec![Value::Integer(1)],
                Value::Error("argument to `first` must be ARRAY, got INTEGER".to_string()),
            ),
            ("last", vec![array.clone()], Value::Integer(3)),
            ("last", vec![empty.clone()], Value::Null),
            (
                "rest",
                vec![array.clone()],
                Value::array(vec![Value::Integer(2), Value::Integer(3)]),
            ),
            ("rest", vec![empty.clone()], Value::Null),
            ("push", vec![empty.clone(), Value::Integer(1)], Value::array(vec![Value::Integer(1)])),
            (
                "push",
                vec![Value::Integer(1), Value::Integer(1)],
                Value::Error("argument to `push` must be ARRAY, got INTEGER".to_string()),
            ),
            ("puts", vec![Value::string("hello"), Value::string("world")], Value::Null),
        ];

        for (name, arguments, expected) in tests {
            assert_eq!(call(name, &arguments)?, expected, "Failed for {}", name);
        }

        Ok(())
    }

    #[test]
    fn test_push_does_not_mutate_its_input() -> Result<()> {
        let array = Value::array(vec![Value::Integer(1)]);
        call("push", &[array.clone(), Value::Integer(2)])?;
        assert_eq!(array, Value::array(vec![Value::Integer(1)]));
        Ok(())
    }
}
