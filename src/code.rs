use std::fmt;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Constant = 1,
    Add,
    Pop,
    Sub,
    Mul,
    Div,
    True,
    False,
    Equal,
    NotEqual,
    GreaterThan,
    Minus,
    Bang,
    JumpNotTruthy,
    Jump,
    Null,
    GetGlobal,
    SetGlobal,
    Array,
    Hash,
    Index,
    Call,
    ReturnValue,
    Return,
    GetLocal,
    SetLocal,
    GetBuiltin,
    Closure,
    GetFree,
    CurrentClosure,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

impl Definition {
    const fn new(name: &'static str, operand_widths: &'static [usize]) -> Self {
        Self {
            name,
            operand_widths,
        }
    }

    /// Total encoded length, opcode byte included.
    pub fn instruction_len(&self) -> usize {
        1 + self.operand_widths.iter().sum::<usize>()
    }
}

// Indexed by `opcode - 1`; order must match the enum.
static OPCODES: [Opcode; 30] = [
    Opcode::Constant,
    Opcode::Add,
    Opcode::Pop,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::True,
    Opcode::False,
    Opcode::Equal,
    Opcode::NotEqual,
    Opcode::GreaterThan,
    Opcode::Minus,
    Opcode::Bang,
    Opcode::JumpNotTruthy,
    Opcode::Jump,
    Opcode::Null,
    Opcode::GetGlobal,
    Opcode::SetGlobal,
    Opcode::Array,
    Opcode::Hash,
    Opcode::Index,
    Opcode::Call,
    Opcode::ReturnValue,
    Opcode::Return,
    Opcode::GetLocal,
    Opcode::SetLocal,
    Opcode::GetBuiltin,
    Opcode::Closure,
    Opcode::GetFree,
    Opcode::CurrentClosure,
];

static DEFINITIONS: [Definition; 30] = [
    Definition::new("OpConstant", &[2]),
    Definition::new("OpAdd", &[]),
    Definition::new("OpPop", &[]),
    Definition::new("OpSub", &[]),
    Definition::new("OpMul", &[]),
    Definition::new("OpDiv", &[]),
    Definition::new("OpTrue", &[]),
    Definition::new("OpFalse", &[]),
    Definition::new("OpEqual", &[]),
    Definition::new("OpNotEqual", &[]),
    Definition::new("OpGreaterThan", &[]),
    Definition::new("OpMinus", &[]),
    Definition::new("OpBang", &[]),
    Definition::new("OpJumpNotTruthy", &[2]),
    Definition::new("OpJump", &[2]),
    Definition::new("OpNull", &[]),
    Definition::new("OpGetGlobal", &[2]),
    Definition::new("OpSetGlobal", &[2]),
    Definition::new("OpArray", &[2]),
    Definition::new("OpHash", &[2]),
    Definition::new("OpIndex", &[]),
    Definition::new("OpCall", &[1]),
    Definition::new("OpReturnValue", &[]),
    Definition::new("OpReturn", &[]),
    Definition::new("OpGetLocal", &[1]),
    Definition::new("OpSetLocal", &[1]),
    Definition::new("OpGetBuiltin", &[1]),
    Definition::new("OpClosure", &[2, 1]),
    Definition::new("OpGetFree", &[1]),
    Definition::new("OpCurrentClosure", &[]),
];

impl Opcode {
    pub fn definition(self) -> &'static Definition {
        &DEFINITIONS[self as usize - 1]
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        OPCODES.get((byte as usize).wrapping_sub(1)).copied()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.definition().name)
    }
}

/// Encodes one instruction. Every operand is truncated to its declared
/// big-endian width; callers check ranges beforehand.
///
/// Panics if `operands` does not match the opcode's arity.
pub fn make(opcode: Opcode, operands: &[usize]) -> Vec<u8> {
    let definition = opcode.definition();
    assert_eq!(
        operands.len(),
        definition.operand_widths.len(),
        "{} expects {} operand(s)",
        definition.name,
        definition.operand_widths.len()
    );

    let mut instruction = Vec::with_capacity(definition.instruction_len());
    instruction.push(opcode as u8);
    for (operand, width) in operands.iter().zip(definition.operand_widths) {
        match width {
            2 => instruction.extend_from_slice(&(*operand as u16).to_be_bytes()),
            1 => instruction.push(*operand as u8),
            _ => unreachable!("operand widths are either 1 or 2 bytes"),
        }
    }
    instruction
}

pub fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

pub fn read_u8(bytes: &[u8], offset: usize) -> u8 {
    bytes[offset]
}

pub fn read_operand(bytes: &[u8], offset: usize, width: usize) -> usize {
    match width {
        2 => read_u16(bytes, offset) as usize,
        1 => read_u8(bytes, offset) as usize,
        _ => unreachable!("operand widths are either 1 or 2 bytes"),
    }
}

/// Decodes the operands that follow an opcode. `bytes` starts at the first
/// operand byte; returns the operands and the number of bytes read.
pub fn read_operands(definition: &Definition, bytes: &[u8]) -> (Vec<usize>, usize) {
    let mut offset = 0;
    let operands = definition
        .operand_widths
        .iter()
        .map(|width| {
            let operand = read_operand(bytes, offset, *width);
            offset += width;
            operand
        })
        .collect();
    (operands, offset)
}

/// A flat instruction stream. Positions handed out while emitting are byte
/// offsets, so patching never depends on where the buffer lives in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Appends an encoded instruction and returns its starting position.
    pub fn push(&mut self, instruction: &[u8]) -> usize {
        let position = self.0.len();
        self.0.extend_from_slice(instruction);
        position
    }

    /// Overwrites bytes in place starting at `position`.
    pub fn replace(&mut self, position: usize, instruction: &[u8]) {
        self.0[position..position + instruction.len()].copy_from_slice(instruction);
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

impl From<Vec<Vec<u8>>> for Instructions {
    fn from(instructions: Vec<Vec<u8>>) -> Self {
        Self(instructions.concat())
    }
}

impl fmt::Display for Instructions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut position = 0;
        while position < self.0.len() {
            let opcode = match Opcode::from_byte(self.0[position]) {
                Some(opcode) => opcode,
                None => {
                    writeln!(f, "ERROR: unknown opcode {}", self.0[position])?;
                    position += 1;
                    continue;
                }
            };
            let definition = opcode.definition();
            let (operands, read) = read_operands(definition, &self.0[position + 1..]);
            let operands = operands
                .iter()
                .map(|operand| operand.to_string())
                .collect::<Vec<_>>();
            if operands.is_empty() {
                writeln!(f, "{:0>4} {}", position, definition.name)?;
            } else {
                writeln!(f, "{:0>4} {} {}", position, definition.name, operands.join(" "))?;
            }
            position += 1 + read;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn test_make() {
        let tests = [
            (Opcode::Constant, vec![65534], vec![Opcode::Constant as u8, 255, 254]),
            (Opcode::Add, vec![], vec![Opcode::Add as u8]),
            (Opcode::GetLocal, vec![255], vec![Opcode::GetLocal as u8, 255]),
            (Opcode::Closure, vec![65534, 255], vec![Opcode::Closure as u8, 255, 254, 255]),
        ];

        for (opcode, operands, expected) in tests {
            assert_eq!(make(opcode, &operands), expected, "Failed for {}", opcode);
        }
    }

    #[test]
    #[should_panic]
    fn test_make_rejects_wrong_arity() {
        make(Opcode::Constant, &[]);
    }

    #[test]
    fn test_opcode_bytes() {
        assert_eq!(Opcode::Constant as u8, 1);
        assert_eq!(Opcode::GetBuiltin as u8, 27);
        assert_eq!(Opcode::CurrentClosure as u8, 30);
        for byte in 1..=30u8 {
            let opcode = Opcode::from_byte(byte).map(|opcode| opcode as u8);
            assert_eq!(opcode, Some(byte));
        }
        assert_eq!(Opcode::from_byte(0), None);
        assert_eq!(Opcode::from_byte(31), None);
    }

    #[test]
    fn test_instructions_string() {
        let instructions: Instructions = vec![
            make(Opcode::Add, &[]),
            make(Opcode::GetLocal, &[1]),
            make(Opcode::Constant, &[2]),
            make(Opcode::Constant, &[65535]),
            make(Opcode::Closure, &[65535, 255]),
        ]
        .into();

        let expected = "0000 OpAdd
0001 OpGetLocal 1
0003 OpConstant 2
0006 OpConstant 65535
0009 OpClosure 65535 255
";

        assert_eq!(instructions.to_string(), expected);
    }

    #[test]
    fn test_read_operands() -> Result<()> {
        let tests = [
            (Opcode::Constant, vec![65535], 2),
            (Opcode::GetLocal, vec![255], 1),
            (Opcode::Call, vec![0], 1),
            (Opcode::Closure, vec![65535, 255], 3),
            (Opcode::Pop, vec![], 0),
        ];

        for (opcode, operands, bytes_read) in tests {
            let instruction = make(opcode, &operands);
            let definition = Opcode::from_byte(instruction[0])
                .context("Failed to decode opcode")?
                .definition();
            let (decoded, read) = read_operands(definition, &instruction[1..]);
            assert_eq!(read, bytes_read);
            assert_eq!(decoded, operands);
        }

        Ok(())
    }

    #[test]
    fn test_every_opcode_round_trips() -> Result<()> {
        for byte in 1..=30u8 {
            let opcode = Opcode::from_byte(byte).context("Failed to decode opcode")?;
            let definition = opcode.definition();
            for fill in [0usize, 1, usize::MAX] {
                let operands = definition
                    .operand_widths
                    .iter()
                    .map(|width| fill.min((1 << (8 * width)) - 1))
                    .collect::<Vec<_>>();

                let instruction = make(opcode, &operands);
                assert_eq!(instruction.len(), definition.instruction_len(), "{}", opcode);
                assert_eq!(instruction[0], byte);

                let (decoded, read) = read_operands(definition, &instruction[1..]);
                assert_eq!(decoded, operands, "{}", opcode);
                assert_eq!(read, instruction.len() - 1, "{}", opcode);
            }
        }
        Ok(())
    }

    #[test]
    fn test_replace_patches_in_place() {
        let mut instructions = Instructions::new();
        instructions.push(&make(Opcode::True, &[]));
        let jump = instructions.push(&make(Opcode::JumpNotTruthy, &[9999]));
        instructions.push(&make(Opcode::Null, &[]));
        instructions.replace(jump, &make(Opcode::JumpNotTruthy, &[5]));

        assert_eq!(read_operand(instructions.as_bytes(), jump + 1, 2), 5);
        assert_eq!(instructions.len(), 5);
    }
}
