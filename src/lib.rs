mod builtins;
mod code;
mod compiler;
mod error;
mod evaluator;
mod lexer;
mod parser;
mod symbol_table;
mod value;
mod vm;

pub use self::{
    builtins::*, code::*, compiler::*, error::*, evaluator::*, lexer::*, parser::*,
    symbol_table::*, value::*, vm::*,
};

use anyhow::{bail, Result};
use std::{
    fmt::{self, Display},
    str::FromStr,
};

/// Which backend runs a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Tree-walking evaluator
    Eval,
    /// Bytecode compiler and virtual machine
    Vm,
}

impl Engine {
    pub const NAMES: [&'static str; 2] = ["eval", "vm"];
}

impl FromStr for Engine {
    type Err = anyhow::Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "eval" => Ok(Engine::Eval),
            "vm" => Ok(Engine::Vm),
            other => bail!("Unknown engine '{}', expected one of: eval, vm", other),
        }
    }
}

impl Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Engine::Eval => write!(f, "eval"),
            Engine::Vm => write!(f, "vm"),
        }
    }
}

/// Lexes and parses a complete source text.
pub fn parse_program(source: &str) -> Result<Program> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser::new(&tokens).parse()
}

fn flatten(items: &[impl Display], separator: &str) -> String {
    let strings = items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    strings.join(separator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_round_trip() -> Result<()> {
        for name in Engine::NAMES.iter() {
            assert_eq!(name.parse::<Engine>()?.to_string(), *name);
        }
        assert!("jit".parse::<Engine>().is_err());
        Ok(())
    }

    #[test]
    fn parse_program_reports_lexing_and_parsing_errors() {
        assert!(parse_program("let x = 5;").is_ok());
        assert!(parse_program("\"unterminated").is_err());
        assert!(parse_program("let = 5;").is_err());
    }
}
