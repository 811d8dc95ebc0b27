use crate::{
    builtins::BUILTINS,
    code::{read_operand, Opcode},
    error::RuntimeError,
    value::{Closure, HashPair, Value},
    Bytecode,
};
use anyhow::{bail, Result};
use std::{collections::HashMap, sync::Arc};

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

static NULL: Value = Value::Null;

/// One activation. The main program runs in a frame without a closure and
/// reads its instructions straight from the shared bytecode.
#[derive(Debug, Clone)]
pub struct Frame {
    pub closure: Option<Arc<Closure>>,
    pub ip: usize,
    pub base_pointer: usize,
}

impl Frame {
    pub fn new(closure: Arc<Closure>, base_pointer: usize) -> Self {
        Self {
            closure: Some(closure),
            ip: 0,
            base_pointer,
        }
    }

    fn main() -> Self {
        Self {
            closure: None,
            ip: 0,
            base_pointer: 0,
        }
    }
}

fn instructions<'a>(bytecode: &'a Bytecode, frame: &'a Frame) -> &'a [u8] {
    match &frame.closure {
        Some(closure) => closure.function.instructions.as_bytes(),
        None => bytecode.instructions.as_bytes(),
    }
}

pub struct VirtualMachine {
    bytecode: Arc<Bytecode>,
    stack: Vec<Value>,
    stack_pointer: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
}

impl VirtualMachine {
    /// Accepts owned or shared bytecode. Machines built from clones of one
    /// `Arc<Bytecode>` read the same instructions and constants.
    pub fn new(bytecode: impl Into<Arc<Bytecode>>) -> Self {
        Self::new_with_globals(bytecode, Vec::new())
    }

    /// Runs `bytecode` against globals left behind by an earlier machine.
    pub fn new_with_globals(bytecode: impl Into<Arc<Bytecode>>, mut globals: Vec<Value>) -> Self {
        globals.resize(GLOBALS_SIZE, Value::Null);

        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::main());

        Self {
            bytecode: bytecode.into(),
            stack: vec![Value::Null; STACK_SIZE],
            stack_pointer: 0,
            globals,
            frames,
        }
    }

    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    pub fn stack_top(&self) -> Option<&Value> {
        match self.stack_pointer {
            0 => None,
            pointer => self.stack.get(pointer - 1),
        }
    }

    /// The value most recently discarded from the stack, which is the result
    /// of the last expression statement.
    pub fn last_popped(&self) -> &Value {
        self.stack.get(self.stack_pointer).unwrap_or(&NULL)
    }

    pub fn run(&mut self) -> Result<()> {
        log::debug!(
            "running {} bytes of instructions with {} constant(s)",
            self.bytecode.instructions.len(),
            self.bytecode.constants.len()
        );

        while let Some(byte) = self.fetch() {
            let opcode = match Opcode::from_byte(byte) {
                Some(opcode) => opcode,
                None => bail!(RuntimeError::UnknownOpcode(byte)),
            };

            match opcode {
                Opcode::Constant => {
                    let index = self.read_operand(2);
                    let constant = self.bytecode.constants[index].clone();
                    self.push(constant)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    self.execute_binary_operation(opcode)?;
                }
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                    self.execute_comparison(opcode)?;
                }
                Opcode::Bang => {
                    let operand = self.pop()?;
                    self.push(Value::Boolean(!operand.is_truthy()))?;
                }
                Opcode::Minus => {
                    let operand = self.pop()?;
                    match operand {
                        Value::Integer(value) => self.push(Value::Integer(value.wrapping_neg()))?,
                        other => bail!(RuntimeError::UnsupportedNegation(other.type_name())),
                    }
                }
                Opcode::True => self.push(Value::Boolean(true))?,
                Opcode::False => self.push(Value::Boolean(false))?,
                Opcode::Null => self.push(Value::Null)?,
                Opcode::Jump => {
                    let target = self.read_operand(2);
                    self.current_frame_mut().ip = target;
                }
                Opcode::JumpNotTruthy => {
                    let target = self.read_operand(2);
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target;
                    }
                }
                Opcode::SetGlobal => {
                    let index = self.read_operand(2);
                    self.globals[index] = self.pop()?;
                }
                Opcode::GetGlobal => {
                    let index = self.read_operand(2);
                    let value = self.globals[index].clone();
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let index = self.read_operand(1);
                    let base_pointer = self.current_frame().base_pointer;
                    self.stack[base_pointer + index] = self.pop()?;
                }
                Opcode::GetLocal => {
                    let index = self.read_operand(1);
                    let base_pointer = self.current_frame().base_pointer;
                    let value = self.stack[base_pointer + index].clone();
                    self.push(value)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_operand(1);
                    self.push(Value::Builtin(&BUILTINS[index]))?;
                }
                Opcode::GetFree => {
                    let index = self.read_operand(1);
                    let value = match &self.current_frame().closure {
                        Some(closure) => closure.free.get(index).cloned(),
                        None => None,
                    };
                    match value {
                        Some(value) => self.push(value)?,
                        None => bail!("No free variable {} in the current frame", index),
                    }
                }
                Opcode::CurrentClosure => {
                    match self.current_frame().closure.clone() {
                        Some(closure) => self.push(Value::Closure(closure))?,
                        None => bail!("No closure is executing in the main program"),
                    }
                }
                Opcode::Array => {
                    let length = self.read_operand(2);
                    let elements = self.take_from_stack(length)?;
                    self.push(Value::array(elements))?;
                }
                Opcode::Hash => {
                    let length = self.read_operand(2);
                    let items = self.take_from_stack(length)?;
                    let hash = build_hash(items)?;
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.push(execute_index_expression(&left, &index)?)?;
                }
                Opcode::Call => {
                    let num_args = self.read_operand(1);
                    self.execute_call(num_args)?;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    self.return_from_frame(value)?;
                }
                Opcode::Return => self.return_from_frame(Value::Null)?,
                Opcode::Closure => {
                    let index = self.read_operand(2);
                    let num_free = self.read_operand(1);
                    self.push_closure(index, num_free)?;
                }
            }
        }

        log::debug!("finished with last popped value '{}'", self.last_popped());
        Ok(())
    }

    fn current_frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Reads the next opcode byte of the current frame, if any remain.
    fn fetch(&mut self) -> Option<u8> {
        let frame = self.frames.last_mut()?;
        let byte = *instructions(&self.bytecode, frame).get(frame.ip)?;
        frame.ip += 1;
        Some(byte)
    }

    fn read_operand(&mut self, width: usize) -> usize {
        let last = self.frames.len() - 1;
        let frame = &mut self.frames[last];
        let operand = read_operand(instructions(&self.bytecode, frame), frame.ip, width);
        frame.ip += width;
        operand
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack_pointer >= STACK_SIZE {
            bail!(RuntimeError::StackOverflow);
        }
        self.stack[self.stack_pointer] = value;
        self.stack_pointer += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        if self.stack_pointer == 0 {
            bail!(RuntimeError::StackUnderflow);
        }
        self.stack_pointer -= 1;
        Ok(self.stack[self.stack_pointer].clone())
    }

    fn take_from_stack(&mut self, length: usize) -> Result<Vec<Value>> {
        if length > self.stack_pointer {
            bail!(RuntimeError::StackUnderflow);
        }
        let start = self.stack_pointer - length;
        let values = self.stack[start..self.stack_pointer].to_vec();
        self.stack_pointer = start;
        Ok(values)
    }

    fn execute_binary_operation(&mut self, opcode: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Value::Integer(left), Value::Integer(right)) => {
                Value::Integer(integer_operation(opcode, *left, *right)?)
            }
            (Value::String(left), Value::String(right)) if opcode == Opcode::Add => {
                Value::string(&format!("{}{}", left, right))
            }
            (Value::String(_), Value::String(_)) => bail!(RuntimeError::UnknownOperator {
                operator: opcode.definition().name,
                left: left.type_name(),
                right: right.type_name(),
            }),
            _ => bail!(RuntimeError::UnsupportedBinaryTypes(
                left.type_name(),
                right.type_name()
            )),
        };

        self.push(result)
    }

    fn execute_comparison(&mut self, opcode: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (opcode, &left, &right) {
            (Opcode::GreaterThan, Value::Integer(left), Value::Integer(right)) => left > right,
            (Opcode::Equal, _, _) => left == right,
            (Opcode::NotEqual, _, _) => left != right,
            _ => bail!(RuntimeError::UnknownOperator {
                operator: opcode.definition().name,
                left: left.type_name(),
                right: right.type_name(),
            }),
        };

        self.push(Value::Boolean(result))
    }

    fn execute_call(&mut self, num_args: usize) -> Result<()> {
        if num_args >= self.stack_pointer {
            bail!(RuntimeError::StackUnderflow);
        }
        let callee = self.stack[self.stack_pointer - 1 - num_args].clone();
        match callee {
            Value::Closure(closure) => self.call_closure(closure, num_args),
            Value::Builtin(builtin) => {
                let arguments = self.take_from_stack(num_args)?;
                log::trace!("calling builtin '{}' with {} argument(s)", builtin.name, num_args);
                let result = builtin.call(&arguments);
                self.stack_pointer -= 1;
                self.push(result)
            }
            other => bail!(RuntimeError::NotCallable(other.type_name())),
        }
    }

    fn call_closure(&mut self, closure: Arc<Closure>, num_args: usize) -> Result<()> {
        let function = &closure.function;
        if num_args != function.num_parameters {
            bail!(RuntimeError::WrongArgumentCount {
                want: function.num_parameters,
                got: num_args,
            });
        }
        if self.frames.len() >= MAX_FRAMES {
            bail!(RuntimeError::FrameOverflow(MAX_FRAMES));
        }

        let base_pointer = self.stack_pointer - num_args;
        let stack_pointer = base_pointer + function.num_locals;
        if stack_pointer > STACK_SIZE {
            bail!(RuntimeError::StackOverflow);
        }

        // Locals left over from an earlier call must not leak into this one.
        for slot in self.stack[base_pointer + num_args..stack_pointer].iter_mut() {
            *slot = Value::Null;
        }

        log::trace!(
            "calling closure with {} argument(s) at depth {}",
            num_args,
            self.frames.len()
        );
        self.frames.push(Frame::new(closure, base_pointer));
        self.stack_pointer = stack_pointer;
        Ok(())
    }

    /// Leaves the current frame with `value` as its result. Returning from the
    /// main frame halts the machine with `value` as the last popped value.
    fn return_from_frame(&mut self, value: Value) -> Result<()> {
        if self.frames.len() == 1 {
            if let Some(slot) = self.stack.get_mut(self.stack_pointer) {
                *slot = value;
            }
            let end = instructions(&self.bytecode, self.current_frame()).len();
            self.current_frame_mut().ip = end;
            return Ok(());
        }

        if let Some(frame) = self.frames.pop() {
            self.stack_pointer = frame.base_pointer - 1;
        }
        self.push(value)
    }

    fn push_closure(&mut self, index: usize, num_free: usize) -> Result<()> {
        let function = match &self.bytecode.constants[index] {
            Value::CompiledFunction(function) => function.clone(),
            other => bail!(RuntimeError::NotAFunction(other.type_name())),
        };
        let free = self.take_from_stack(num_free)?;
        self.push(Value::Closure(Arc::new(Closure::new(function, free))))
    }
}

fn integer_operation(opcode: Opcode, left: i64, right: i64) -> Result<i64> {
    Ok(match opcode {
        Opcode::Add => left.wrapping_add(right),
        Opcode::Sub => left.wrapping_sub(right),
        Opcode::Mul => left.wrapping_mul(right),
        Opcode::Div if right == 0 => bail!(RuntimeError::DivisionByZero),
        Opcode::Div => left.wrapping_div(right),
        _ => bail!(RuntimeError::UnknownOperator {
            operator: opcode.definition().name,
            left: "INTEGER",
            right: "INTEGER",
        }),
    })
}

/// Pairs up alternating keys and values taken off the stack.
fn build_hash(items: Vec<Value>) -> Result<Value> {
    let mut pairs = HashMap::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        let hash_key = match key.hash_key() {
            Some(hash_key) => hash_key,
            None => bail!(RuntimeError::UnusableHashKey(key.type_name())),
        };
        pairs.insert(hash_key, HashPair { key, value });
    }
    Ok(Value::Hash(Arc::new(pairs)))
}

fn execute_index_expression(left: &Value, index: &Value) -> Result<Value> {
    Ok(match (left, index) {
        (Value::Array(elements), Value::Integer(index)) => usize::try_from(*index)
            .ok()
            .and_then(|index| elements.get(index))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Hash(pairs), key) => {
            let hash_key = match key.hash_key() {
                Some(hash_key) => hash_key,
                None => bail!(RuntimeError::UnusableHashKey(key.type_name())),
            };
            pairs
                .get(&hash_key)
                .map(|pair| pair.value.clone())
                .unwrap_or(Value::Null)
        }
        _ => bail!(RuntimeError::IndexNotSupported(left.type_name())),
    })
}
