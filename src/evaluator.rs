use crate::{
    builtins::lookup_builtin,
    value::{Function, HashPair, Value},
    Block, Expression, Identifier, Literal, Operator, Program, Statement,
};
use std::{collections::HashMap, sync::Arc};

/// One scope of bindings. `outer` indexes the enclosing scope in the
/// evaluator's arena.
#[derive(Debug, Default, Clone)]
pub struct Environment {
    store: HashMap<String, Value>,
    outer: Option<usize>,
}

impl Environment {
    fn new_enclosed(outer: usize) -> Self {
        Self {
            store: HashMap::new(),
            outer: Some(outer),
        }
    }
}

/// Anything that stops a statement sequence early.
enum Signal {
    Return(Value),
    Error(String),
}

type Evaluation = std::result::Result<Value, Signal>;

fn error<T>(message: String) -> std::result::Result<T, Signal> {
    Err(Signal::Error(message))
}

const GLOBAL: usize = 0;

/// Deepest chain of user function calls. Every call recurses through several
/// native frames, so the bound keeps evaluation inside a default thread stack.
pub const MAX_CALL_DEPTH: usize = 200;

/// A tree-walking interpreter. Bindings made by one call to
/// [`Evaluator::evaluate`] stay visible to the next.
pub struct Evaluator {
    environments: Vec<Environment>,
    functions_created: usize,
    depth: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            environments: vec![Environment::default()],
            functions_created: 0,
            depth: 0,
        }
    }

    /// Evaluates a program to the value of its last statement. Failures are
    /// reported as [`Value::Error`].
    pub fn evaluate(&mut self, program: &Program) -> Value {
        let mut result = Value::Null;
        for statement in program.iter() {
            result = match self.evaluate_statement(statement, GLOBAL) {
                Ok(value) => value,
                Err(Signal::Return(value)) => return value,
                Err(Signal::Error(message)) => return Value::Error(message),
            };
        }
        result
    }

    fn evaluate_statement(&mut self, statement: &Statement, env: usize) -> Evaluation {
        match statement {
            Statement::Let(identifier, expression) => {
                let value = self.evaluate_expression(expression, env)?;
                self.environments[env].store.insert(identifier.0.to_string(), value);
                Ok(Value::Null)
            }
            Statement::Return(Some(expression)) => {
                let value = self.evaluate_expression(expression, env)?;
                Err(Signal::Return(value))
            }
            Statement::Return(None) => Err(Signal::Return(Value::Null)),
            Statement::Expression(expression) => self.evaluate_expression(expression, env),
        }
    }

    fn evaluate_block(&mut self, block: &Block, env: usize) -> Evaluation {
        let mut result = Value::Null;
        for statement in block.0.iter() {
            result = self.evaluate_statement(statement, env)?;
        }
        Ok(result)
    }

    fn evaluate_expression(&mut self, expression: &Expression, env: usize) -> Evaluation {
        match expression {
            Expression::Identifier(identifier) => self.lookup(identifier, env),
            Expression::Literal(literal) => self.evaluate_literal(literal, env),
            Expression::Prefix(operator, operand) => {
                let operand = self.evaluate_expression(operand, env)?;
                evaluate_prefix(*operator, operand)
            }
            Expression::Infix(left, operator, right) => {
                let left = self.evaluate_expression(left, env)?;
                let right = self.evaluate_expression(right, env)?;
                evaluate_infix(*operator, left, right)
            }
            Expression::If(condition, consequence, alternative) => {
                if self.evaluate_expression(condition, env)?.is_truthy() {
                    self.evaluate_block(consequence, env)
                } else {
                    match alternative {
                        Some(alternative) => self.evaluate_block(alternative, env),
                        None => Ok(Value::Null),
                    }
                }
            }
            Expression::Function(function) => {
                self.functions_created += 1;
                Ok(Value::Function(Arc::new(Function {
                    parameters: function.parameters.clone(),
                    body: function.body.clone(),
                    environment: env,
                })))
            }
            Expression::Call(function, arguments) => {
                let function = self.evaluate_expression(function, env)?;
                let arguments = arguments
                    .iter()
                    .map(|argument| self.evaluate_expression(argument, env))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                self.apply_function(function, arguments)
            }
            Expression::Index(left, index) => {
                let left = self.evaluate_expression(left, env)?;
                let index = self.evaluate_expression(index, env)?;
                evaluate_index(&left, &index)
            }
        }
    }

    fn evaluate_literal(&mut self, literal: &Literal, env: usize) -> Evaluation {
        Ok(match literal {
            Literal::Integer(value) => Value::Integer(*value),
            Literal::Boolean(value) => Value::Boolean(*value),
            Literal::String(value) => Value::string(value),
            Literal::Array(elements) => {
                let elements = elements
                    .iter()
                    .map(|element| self.evaluate_expression(element, env))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Value::array(elements)
            }
            Literal::Hash(pairs) => {
                let mut hash = HashMap::with_capacity(pairs.len());
                for (key, value) in pairs.iter() {
                    let key = self.evaluate_expression(key, env)?;
                    let hash_key = match key.hash_key() {
                        Some(hash_key) => hash_key,
                        None => return error(format!("unusable as hash key: {}", key.type_name())),
                    };
                    let value = self.evaluate_expression(value, env)?;
                    hash.insert(hash_key, HashPair { key, value });
                }
                Value::Hash(Arc::new(hash))
            }
        })
    }

    fn lookup(&self, identifier: &Identifier, env: usize) -> Evaluation {
        let mut current = Some(env);
        while let Some(index) = current {
            let environment = &self.environments[index];
            if let Some(value) = environment.store.get(&identifier.0) {
                return Ok(value.clone());
            }
            current = environment.outer;
        }

        match lookup_builtin(&identifier.0) {
            Some(builtin) => Ok(Value::Builtin(builtin)),
            None => error(format!("identifier not found: {}", identifier.0)),
        }
    }

    fn apply_function(&mut self, function: Value, arguments: Vec<Value>) -> Evaluation {
        match function {
            Value::Function(function) => {
                if arguments.len() != function.parameters.len() {
                    return error(format!(
                        "wrong number of arguments: want={}, got={}",
                        function.parameters.len(),
                        arguments.len()
                    ));
                }
                if self.depth >= MAX_CALL_DEPTH {
                    return error("stack overflow".to_string());
                }

                let index = self.environments.len();
                let mut environment = Environment::new_enclosed(function.environment);
                for (parameter, argument) in function.parameters.iter().zip(arguments) {
                    environment.store.insert(parameter.0.to_string(), argument);
                }
                self.environments.push(environment);

                let functions_created = self.functions_created;
                self.depth += 1;
                let result = self.evaluate_block(&function.body, index);
                self.depth -= 1;

                // Scopes of a call that created no closures are unreachable now.
                if self.functions_created == functions_created {
                    self.environments.truncate(index);
                }

                match result {
                    Err(Signal::Return(value)) => Ok(value),
                    result => result,
                }
            }
            Value::Builtin(builtin) => match builtin.call(&arguments) {
                Value::Error(message) => error(message),
                value => Ok(value),
            },
            other => error(format!("not a function: {}", other.type_name())),
        }
    }
}

fn evaluate_prefix(operator: Operator, operand: Value) -> Evaluation {
    match (operator, &operand) {
        (Operator::Bang, _) => Ok(Value::Boolean(!operand.is_truthy())),
        (Operator::Minus, Value::Integer(value)) => Ok(Value::Integer(value.wrapping_neg())),
        _ => error(format!("unknown operator: {}{}", operator, operand.type_name())),
    }
}

fn evaluate_infix(operator: Operator, left: Value, right: Value) -> Evaluation {
    match (&left, &right) {
        (Value::Integer(left), Value::Integer(right)) => evaluate_integer_infix(operator, *left, *right),
        (Value::String(left), Value::String(right)) if operator == Operator::Plus => {
            Ok(Value::string(&format!("{}{}", left, right)))
        }
        _ if operator == Operator::Equal => Ok(Value::Boolean(left == right)),
        _ if operator == Operator::NotEqual => Ok(Value::Boolean(left != right)),
        _ if left.type_name() != right.type_name() => error(format!(
            "type mismatch: {} {} {}",
            left.type_name(),
            operator,
            right.type_name()
        )),
        _ => error(format!(
            "unknown operator: {} {} {}",
            left.type_name(),
            operator,
            right.type_name()
        )),
    }
}

fn evaluate_integer_infix(operator: Operator, left: i64, right: i64) -> Evaluation {
    Ok(match operator {
        Operator::Plus => Value::Integer(left.wrapping_add(right)),
        Operator::Minus => Value::Integer(left.wrapping_sub(right)),
        Operator::Asterisk => Value::Integer(left.wrapping_mul(right)),
        Operator::Slash if right == 0 => return error("division by zero".to_string()),
        Operator::Slash => Value::Integer(left.wrapping_div(right)),
        Operator::LessThan => Value::Boolean(left < right),
        Operator::GreaterThan => Value::Boolean(left > right),
        Operator::Equal => Value::Boolean(left == right),
        Operator::NotEqual => Value::Boolean(left != right),
        Operator::Bang => return error(format!("unknown operator: INTEGER {} INTEGER", operator)),
    })
}

fn evaluate_index(left: &Value, index: &Value) -> Evaluation {
    match (left, index) {
        (Value::Array(elements), Value::Integer(index)) => Ok(usize::try_from(*index)
            .ok()
            .and_then(|index| elements.get(index))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::Hash(pairs), key) => match key.hash_key() {
            Some(hash_key) => Ok(pairs
                .get(&hash_key)
                .map(|pair| pair.value.clone())
                .unwrap_or(Value::Null)),
            None => error(format!("unusable as hash key: {}", key.type_name())),
        },
        _ => error(format!("index operator not supported: {}", left.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Lexer, Parser};
    use anyhow::Result;

    fn evaluate(input: &str) -> Result<Value> {
        let tokens = Lexer::new(input).tokenize()?;
        let program = Parser::new(&tokens).parse()?;
        Ok(Evaluator::new().evaluate(&program))
    }

    fn run_evaluator_tests(tests: &[(&str, Value)]) -> Result<()> {
        for (input, expected) in tests {
            assert_eq!(&evaluate(input)?, expected, "Failed for '{}'", input);
        }
        Ok(())
    }

    fn int(value: i64) -> Value {
        Value::Integer(value)
    }

    fn error_value(message: &str) -> Value {
        Value::Error(message.to_string())
    }

    #[test]
    fn evaluate_integer_expressions() -> Result<()> {
        run_evaluator_tests(&[
            ("5", int(5)),
            ("-10", int(-10)),
            ("5 + 5 + 5 + 5 - 10", int(10)),
            ("2 * 2 * 2 * 2 * 2", int(32)),
            ("-50 + 100 + -50", int(0)),
            ("20 + 2 * -10", int(0)),
            ("50 / 2 * 2 + 10", int(60)),
            ("3 * (3 * 3) + 10", int(37)),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", int(50)),
            ("-7 / 2", int(-3)),
            ("9223372036854775807 + 1", int(i64::MIN)),
        ])
    }

    #[test]
    fn evaluate_boolean_expressions() -> Result<()> {
        let tests = [
            ("true", true),
            ("false", false),
            ("1 < 2", true),
            ("1 > 2", false),
            ("1 == 1", true),
            ("1 != 2", true),
            ("true == true", true),
            ("true != false", true),
            ("(1 < 2) == true", true),
            ("(1 > 2) == true", false),
            ("!true", false),
            ("!!5", true),
            (r#""a" == "a""#, true),
            (r#""a" != "b""#, true),
            ("[1, 2] == [1, 2]", true),
            ("1 == true", false),
        ];

        for (input, expected) in tests {
            assert_eq!(evaluate(input)?, Value::Boolean(expected), "Failed for '{}'", input);
        }
        Ok(())
    }

    #[test]
    fn evaluate_conditionals() -> Result<()> {
        run_evaluator_tests(&[
            ("if (true) { 10 }", int(10)),
            ("if (false) { 10 }", Value::Null),
            ("if (1) { 10 }", int(10)),
            ("if (1 < 2) { 10 } else { 20 }", int(10)),
            ("if (1 > 2) { 10 } else { 20 }", int(20)),
        ])
    }

    #[test]
    fn evaluate_return_statements() -> Result<()> {
        run_evaluator_tests(&[
            ("return 10;", int(10)),
            ("return 10; 9;", int(10)),
            ("return 2 * 5; 9;", int(10)),
            ("9; return 2 * 5; 9;", int(10)),
            ("if (10 > 1) { if (10 > 1) { return 10; } return 1; }", int(10)),
            ("let f = fn() { return; }; f()", Value::Null),
        ])
    }

    #[test]
    fn evaluate_errors() -> Result<()> {
        run_evaluator_tests(&[
            ("5 + true;", error_value("type mismatch: INTEGER + BOOLEAN")),
            ("5 + true; 5;", error_value("type mismatch: INTEGER + BOOLEAN")),
            ("-true", error_value("unknown operator: -BOOLEAN")),
            ("true + false;", error_value("unknown operator: BOOLEAN + BOOLEAN")),
            (
                "if (10 > 1) { true + false; }",
                error_value("unknown operator: BOOLEAN + BOOLEAN"),
            ),
            (
                "if (10 > 1) { if (10 > 1) { return true + false; } return 1; }",
                error_value("unknown operator: BOOLEAN + BOOLEAN"),
            ),
            ("foobar", error_value("identifier not found: foobar")),
            (r#""Hello" - "World""#, error_value("unknown operator: STRING - STRING")),
            (
                r#"{"name": "Monkey"}[fn(x) { x }];"#,
                error_value("unusable as hash key: FUNCTION"),
            ),
            ("{[1]: 2}", error_value("unusable as hash key: ARRAY")),
            ("1[0]", error_value("index operator not supported: INTEGER")),
            ("let a = 1; a();", error_value("not a function: INTEGER")),
            (
                "let add = fn(a, b) { a + b }; add(1);",
                error_value("wrong number of arguments: want=2, got=1"),
            ),
            ("1 / 0", error_value("division by zero")),
            ("len(1); 5", error_value("argument to `len` not supported, got INTEGER")),
        ])
    }

    #[test]
    fn evaluate_let_statements() -> Result<()> {
        run_evaluator_tests(&[
            ("let a = 5; a;", int(5)),
            ("let a = 5 * 5; a;", int(25)),
            ("let a = 5; let b = a; b;", int(5)),
            ("let a = 5; let b = a; let c = a + b + 5; c;", int(15)),
            ("let a = 5;", Value::Null),
        ])
    }

    #[test]
    fn evaluate_functions() -> Result<()> {
        run_evaluator_tests(&[
            ("let identity = fn(x) { x; }; identity(5);", int(5)),
            ("let identity = fn(x) { return x; }; identity(5);", int(5)),
            ("let double = fn(x) { x * 2; }; double(5);", int(10)),
            ("let add = fn(x, y) { x + y; }; add(5, 5);", int(10)),
            ("let add = fn(x, y) { x + y; }; add(5 + 5, add(5, 5));", int(20)),
            ("fn(x) { x; }(5)", int(5)),
            ("let f = fn() { }; f()", Value::Null),
        ])
    }

    #[test]
    fn evaluate_function_display() -> Result<()> {
        assert_eq!(evaluate("fn(x) { x + 2; };")?.to_string(), "fn(x) { (x + 2) }");
        Ok(())
    }

    #[test]
    fn evaluate_closures() -> Result<()> {
        run_evaluator_tests(&[
            (
                "let newAdder = fn(x) { fn(y) { x + y } }; let addTwo = newAdder(2); addTwo(3);",
                int(5),
            ),
            (
                "let a = 1; let newAdderOuter = fn(b) { fn(c) { fn(d) { a + b + c + d }; }; }; let newAdderInner = newAdderOuter(2); let adder = newAdderInner(3); adder(8);",
                int(14),
            ),
            (
                "let makeAll = fn() { [fn() { 1 }, fn() { 2 }] }; let all = makeAll(); all[0]() + all[1]();",
                int(3),
            ),
        ])
    }

    #[test]
    fn evaluate_recursion() -> Result<()> {
        run_evaluator_tests(&[
            (
                "let fib = fn(x) { if (x < 2) { x } else { fib(x - 1) + fib(x - 2) } }; fib(10);",
                int(55),
            ),
            (
                "let wrapper = fn() { let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(3); }; wrapper();",
                int(0),
            ),
        ])
    }

    #[test]
    fn evaluate_strings_arrays_and_hashes() -> Result<()> {
        run_evaluator_tests(&[
            (r#""Hello" + " " + "World!""#, Value::string("Hello World!")),
            ("[1, 2 * 2, 3 + 3]", Value::array(vec![int(1), int(4), int(6)])),
            ("[1, 2, 3][0]", int(1)),
            ("let i = 0; [1][i];", int(1)),
            ("[1, 2, 3][3]", Value::Null),
            ("[1, 2, 3][-1]", Value::Null),
            (r#"{"foo": 5}["foo"]"#, int(5)),
            (r#"{"foo": 5}["bar"]"#, Value::Null),
            (r#"let key = "foo"; {"foo": 5}[key]"#, int(5)),
            ("{5: 5}[5]", int(5)),
            ("{true: 5}[true]", int(5)),
        ])
    }

    #[test]
    fn evaluate_builtins() -> Result<()> {
        run_evaluator_tests(&[
            (r#"len("four")"#, int(4)),
            ("len([1, 2, 3])", int(3)),
            (
                r#"len("one", "two")"#,
                error_value("wrong number of arguments. got=2, want=1"),
            ),
            ("first([1, 2])", int(1)),
            ("last([1, 2])", int(2)),
            ("rest([1, 2, 3])", Value::array(vec![int(2), int(3)])),
            ("push([1], 2)", Value::array(vec![int(1), int(2)])),
            ("let map = fn(f, a) { if (len(a) == 0) { [] } else { push(map(f, rest(a)), f(first(a))) } }; map(fn(x) { x * 2 }, [1, 2, 3]);", Value::array(vec![int(6), int(4), int(2)])),
        ])
    }

    #[test]
    fn globals_persist_across_evaluations() -> Result<()> {
        let mut evaluator = Evaluator::new();

        let program = Parser::new(&Lexer::new("let a = 1;").tokenize()?).parse()?;
        evaluator.evaluate(&program);

        let program = Parser::new(&Lexer::new("a + 1;").tokenize()?).parse()?;
        assert_eq!(evaluator.evaluate(&program), int(2));
        Ok(())
    }

    #[test]
    fn functions_compare_by_identity() -> Result<()> {
        let tests = [
            ("fn() { 1 } == fn() { 1 }", false),
            ("let f = fn() { 1 }; f == f", true),
            ("let f = fn() { 1 }; f != f", false),
            ("let a = fn() { let b = fn() { b }; b() }; a() == a()", false),
            ("let a = fn() { let b = fn() { b }; b() }; let c = a(); c == c()", true),
            ("len == len", true),
            ("len == first", false),
            ("{1: [2]} == {1: [2]}", true),
        ];

        for (input, expected) in tests {
            assert_eq!(evaluate(input)?, Value::Boolean(expected), "Failed for '{}'", input);
        }
        Ok(())
    }

    #[test]
    fn deep_recursion_is_an_error_value() -> Result<()> {
        let mut evaluator = Evaluator::new();
        let countdown = "let f = fn(x) { if (x == 0) { return 0; } f(x - 1) };";
        let program = Parser::new(&Lexer::new(countdown).tokenize()?).parse()?;
        evaluator.evaluate(&program);

        let deep = format!("f({});", MAX_CALL_DEPTH * 3);
        let program = Parser::new(&Lexer::new(&deep).tokenize()?).parse()?;
        assert_eq!(evaluator.evaluate(&program), error_value("stack overflow"));

        let shallow = format!("f({});", MAX_CALL_DEPTH - 1);
        let program = Parser::new(&Lexer::new(&shallow).tokenize()?).parse()?;
        assert_eq!(evaluator.evaluate(&program), int(0));
        Ok(())
    }

    #[test]
    fn calls_without_closures_release_their_scopes() -> Result<()> {
        let mut evaluator = Evaluator::new();
        let program = Parser::new(
            &Lexer::new("let fib = fn(x) { if (x < 2) { x } else { fib(x - 1) + fib(x - 2) } }; fib(12);")
                .tokenize()?,
        )
        .parse()?;
        assert_eq!(evaluator.evaluate(&program), int(144));
        assert_eq!(evaluator.environments.len(), 1);
        Ok(())
    }
}
