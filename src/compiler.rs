use crate::{
    builtins::BUILTINS,
    code::{make, Instructions, Opcode},
    error::CompileError,
    symbol_table::{Symbol, SymbolScope, SymbolTable},
    value::{CompiledFunction, Value},
    Block, Expression, FunctionLiteral, Literal, Operator, Program, Statement,
};
use anyhow::{bail, Context, Result};
use std::sync::Arc;

/// A compiled unit. Immutable once produced, so several virtual machines may
/// execute the same bytecode at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EmittedInstruction {
    opcode: Opcode,
    position: usize,
}

#[derive(Debug, Default)]
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(index, builtin.name);
        }
        Self::new_with_state(symbol_table, Vec::new())
    }

    /// Resumes from the symbols and constants of earlier compilations, so
    /// globals defined there stay addressable.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Value>) -> Self {
        Self {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::default()],
        }
    }

    pub fn into_state(self) -> (SymbolTable, Vec<Value>) {
        (self.symbol_table, self.constants)
    }

    /// Compiles a whole program. Nothing is produced if any statement fails.
    pub fn compile(&mut self, program: &Program) -> Result<Bytecode> {
        let symbol_table = self.symbol_table.clone();
        let num_constants = self.constants.len();

        let result = program
            .iter()
            .try_for_each(|statement| self.compile_statement(statement));

        // A failed unit never runs, so none of its bindings may outlive it.
        if let Err(error) = result {
            self.scopes = vec![CompilationScope::default()];
            self.symbol_table = symbol_table;
            self.constants.truncate(num_constants);
            return Err(error);
        }

        let instructions = std::mem::take(&mut self.current_scope_mut().instructions);
        self.scopes = vec![CompilationScope::default()];

        log::debug!(
            "compiled {} statement(s) into {} bytes and {} constant(s)",
            program.len(),
            instructions.len(),
            self.constants.len()
        );

        Ok(Bytecode {
            instructions,
            constants: self.constants.clone(),
        })
    }

    fn compile_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Let(identifier, expression) => {
                self.compile_expression(expression)?;
                let symbol = self.symbol_table.define(&identifier.0);
                match symbol.scope {
                    SymbolScope::Global => self.emit(Opcode::SetGlobal, &[symbol.index])?,
                    _ => self.emit(Opcode::SetLocal, &[symbol.index])?,
                };
            }
            Statement::Return(Some(expression)) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::ReturnValue, &[])?;
            }
            Statement::Return(None) => {
                self.emit(Opcode::Return, &[])?;
            }
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, &[])?;
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<()> {
        block
            .0
            .iter()
            .try_for_each(|statement| self.compile_statement(statement))
    }

    fn compile_expression(&mut self, expression: &Expression) -> Result<()> {
        match expression {
            Expression::Identifier(identifier) => {
                let symbol = match self.symbol_table.resolve(&identifier.0) {
                    Some(symbol) => symbol,
                    None => bail!(CompileError::UndefinedVariable(identifier.0.to_string())),
                };
                self.load_symbol(&symbol)?;
            }
            Expression::Literal(literal) => self.compile_literal(literal)?,
            Expression::Prefix(operator, operand) => {
                self.compile_expression(operand)?;
                match operator {
                    Operator::Bang => self.emit(Opcode::Bang, &[])?,
                    Operator::Minus => self.emit(Opcode::Minus, &[])?,
                    operator => bail!(CompileError::UnknownOperator(operator.to_string())),
                };
            }
            Expression::Infix(left, operator, right) => self.compile_infix(left, *operator, right)?,
            Expression::If(condition, consequence, alternative) => {
                self.compile_if(condition, consequence, alternative.as_ref())?
            }
            Expression::Function(function) => self.compile_function(function)?,
            Expression::Call(function, arguments) => {
                self.compile_expression(function)?;
                for argument in arguments.iter() {
                    self.compile_expression(argument)?;
                }
                self.emit(Opcode::Call, &[arguments.len()])?;
            }
            Expression::Index(left, index) => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[])?;
            }
        }
        Ok(())
    }

    fn compile_literal(&mut self, literal: &Literal) -> Result<()> {
        match literal {
            Literal::Integer(value) => {
                let index = self.add_constant(Value::Integer(*value));
                self.emit(Opcode::Constant, &[index])?;
            }
            Literal::String(value) => {
                let index = self.add_constant(Value::string(value));
                self.emit(Opcode::Constant, &[index])?;
            }
            Literal::Boolean(true) => {
                self.emit(Opcode::True, &[])?;
            }
            Literal::Boolean(false) => {
                self.emit(Opcode::False, &[])?;
            }
            Literal::Array(elements) => {
                for element in elements.iter() {
                    self.compile_expression(element)?;
                }
                self.emit(Opcode::Array, &[elements.len()])?;
            }
            Literal::Hash(pairs) => {
                for (key, value) in pairs.iter() {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(Opcode::Hash, &[pairs.len() * 2])?;
            }
        }
        Ok(())
    }

    fn compile_infix(&mut self, left: &Expression, operator: Operator, right: &Expression) -> Result<()> {
        check_literal_operands(left, operator, right)?;

        // `a < b` is evaluated as `b > a`.
        if operator == Operator::LessThan {
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(Opcode::GreaterThan, &[])?;
            return Ok(());
        }

        self.compile_expression(left)?;
        self.compile_expression(right)?;

        let opcode = match operator {
            Operator::Plus => Opcode::Add,
            Operator::Minus => Opcode::Sub,
            Operator::Asterisk => Opcode::Mul,
            Operator::Slash => Opcode::Div,
            Operator::GreaterThan => Opcode::GreaterThan,
            Operator::Equal => Opcode::Equal,
            Operator::NotEqual => Opcode::NotEqual,
            operator => bail!(CompileError::UnknownOperator(operator.to_string())),
        };
        self.emit(opcode, &[])?;
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &Block,
        alternative: Option<&Block>,
    ) -> Result<()> {
        self.compile_expression(condition)?;

        // Placeholder targets, patched once the branches are laid out.
        let jump_not_truthy_position = self.emit(Opcode::JumpNotTruthy, &[9999])?;
        self.compile_branch(consequence)?;
        let jump_position = self.emit(Opcode::Jump, &[9999])?;

        let after_consequence = self.current_scope().instructions.len();
        self.change_operand(jump_not_truthy_position, after_consequence)?;

        match alternative {
            Some(alternative) => self.compile_branch(alternative)?,
            None => {
                self.emit(Opcode::Null, &[])?;
            }
        }

        let after_alternative = self.current_scope().instructions.len();
        self.change_operand(jump_position, after_alternative)?;
        Ok(())
    }

    /// Compiles an `if` branch so that it leaves exactly one value behind.
    fn compile_branch(&mut self, block: &Block) -> Result<()> {
        self.compile_block(block)?;
        if self.last_instruction_is(Opcode::Pop) {
            self.remove_last_pop();
        } else {
            self.emit(Opcode::Null, &[])?;
        }
        Ok(())
    }

    fn compile_function(&mut self, function: &FunctionLiteral) -> Result<()> {
        self.enter_scope();

        if let Some(name) = &function.name {
            self.symbol_table.define_function_name(name);
        }
        for parameter in function.parameters.iter() {
            self.symbol_table.define(&parameter.0);
        }

        self.compile_block(&function.body)?;

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[])?;
        }

        let (instructions, symbol_table) = self.leave_scope()?;
        for symbol in symbol_table.free_symbols.iter() {
            self.load_symbol(symbol)?;
        }

        let compiled_function = CompiledFunction {
            instructions,
            num_locals: symbol_table.num_definitions(),
            num_parameters: function.parameters.len(),
        };
        let index = self.add_constant(Value::CompiledFunction(Arc::new(compiled_function)));
        self.emit(Opcode::Closure, &[index, symbol_table.free_symbols.len()])?;
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) -> Result<()> {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index])?,
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index])?,
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index])?,
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index])?,
            SymbolScope::Function => self.emit(Opcode::CurrentClosure, &[])?,
        };
        Ok(())
    }

    fn add_constant(&mut self, constant: Value) -> usize {
        self.constants.push(constant);
        self.constants.len() - 1
    }

    fn emit(&mut self, opcode: Opcode, operands: &[usize]) -> Result<usize> {
        let instruction = encode(opcode, operands)?;
        let scope = self.current_scope_mut();
        let position = scope.instructions.push(&instruction);
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
        Ok(position)
    }

    fn change_operand(&mut self, position: usize, operand: usize) -> Result<()> {
        let scope = self.current_scope_mut();
        let opcode = scope
            .instructions
            .as_bytes()
            .get(position)
            .and_then(|byte| Opcode::from_byte(*byte))
            .context("No instruction to patch at the given position")?;
        let instruction = encode(opcode, &[operand])?;
        scope.instructions.replace(position, &instruction);
        Ok(())
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        matches!(self.current_scope().last_instruction, Some(last) if last.opcode == opcode)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.current_scope_mut();
        if let Some(last) = scope.last_instruction.as_mut() {
            scope
                .instructions
                .replace(last.position, &make(Opcode::ReturnValue, &[]));
            last.opcode = Opcode::ReturnValue;
        }
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        let outer = std::mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    /// Closes the innermost scope, handing back its instructions and the
    /// symbol table that tracked its locals and captures.
    fn leave_scope(&mut self) -> Result<(Instructions, SymbolTable)> {
        if self.scopes.len() < 2 {
            bail!("Attempted to leave the outermost compilation scope!");
        }
        let scope = self.scopes.pop().context("Missing compilation scope")?;
        let outer = self
            .symbol_table
            .outer
            .take()
            .context("Function scope has no enclosing symbol table")?;
        let symbol_table = std::mem::replace(&mut self.symbol_table, *outer);
        Ok((scope.instructions, symbol_table))
    }

    fn current_scope(&self) -> &CompilationScope {
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_scope_mut(&mut self) -> &mut CompilationScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }
}

/// Encodes an instruction after checking that every operand fits its width.
fn encode(opcode: Opcode, operands: &[usize]) -> Result<Vec<u8>> {
    let definition = opcode.definition();
    for (operand, width) in operands.iter().zip(definition.operand_widths) {
        if *operand >= 1 << (8 * width) {
            bail!(CompileError::OperandOverflow {
                opcode: definition.name,
                operand: *operand,
                width: *width,
            });
        }
    }
    Ok(make(opcode, operands))
}

fn literal_type(expression: &Expression) -> Option<&'static str> {
    match expression {
        Expression::Literal(Literal::Integer(_)) => Some("INTEGER"),
        Expression::Literal(Literal::Boolean(_)) => Some("BOOLEAN"),
        Expression::Literal(Literal::String(_)) => Some("STRING"),
        Expression::Literal(Literal::Array(_)) => Some("ARRAY"),
        Expression::Literal(Literal::Hash(_)) => Some("HASH"),
        _ => None,
    }
}

/// Rejects infix operations whose operand types are known up front and can
/// never be combined. Everything else is checked by the virtual machine.
fn check_literal_operands(left: &Expression, operator: Operator, right: &Expression) -> Result<()> {
    let (left, right) = match (literal_type(left), literal_type(right)) {
        (Some(left), Some(right)) => (left, right),
        _ => return Ok(()),
    };

    let supported = match operator {
        Operator::Equal | Operator::NotEqual => true,
        Operator::Plus => left == right && (left == "INTEGER" || left == "STRING"),
        Operator::Minus
        | Operator::Asterisk
        | Operator::Slash
        | Operator::LessThan
        | Operator::GreaterThan => left == "INTEGER" && right == "INTEGER",
        Operator::Bang => false,
    };

    if !supported {
        bail!(CompileError::UnsupportedOperands {
            left,
            operator: operator.to_string(),
            right,
        });
    }
    Ok(())
}
