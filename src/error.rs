/// Every message the parser collected while reading one program.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", .0.join("\n"))]
pub struct ParseErrors(pub Vec<String>);

/// Errors that abort compilation of a whole unit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("identifier not found: {0}")]
    UndefinedVariable(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("unsupported operand types: {left} {operator} {right}")]
    UnsupportedOperands {
        left: &'static str,
        operator: String,
        right: &'static str,
    },

    #[error("operand {operand} does not fit in {width} byte(s) of {opcode}")]
    OperandOverflow {
        opcode: &'static str,
        operand: usize,
        width: usize,
    },
}

/// Fatal errors that stop the virtual machine immediately.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack overflow")]
    StackOverflow,

    #[error("stack underflow")]
    StackUnderflow,

    #[error("frame overflow: call depth exceeded {0}")]
    FrameOverflow(usize),

    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArgumentCount { want: usize, got: usize },

    #[error("calling non-function and non-built-in: {0}")]
    NotCallable(&'static str),

    #[error("unsupported types for binary operation: {0} {1}")]
    UnsupportedBinaryTypes(&'static str, &'static str),

    #[error("unknown operator: {operator} ({left} {right})")]
    UnknownOperator {
        operator: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("unsupported type for negation: {0}")]
    UnsupportedNegation(&'static str),

    #[error("unusable as hash key: {0}")]
    UnusableHashKey(&'static str),

    #[error("index operator not supported: {0}")]
    IndexNotSupported(&'static str),

    #[error("division by zero")]
    DivisionByZero,

    #[error("not a function: {0}")]
    NotAFunction(&'static str),

    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),
}
