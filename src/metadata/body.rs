//! Method bodies.
//!
//! A [`MethodBody`] holds the decoded instruction stream of a method together with its locals,
//! exception handlers and sequence points. Operands that reference metadata carry a [`Token`]
//! (or, for locals and handlers, an embedded [`TypeSig`]/catch type) and are rewritten by the
//! merge engine; instruction offsets and branch targets are left untouched since the merge
//! never changes instruction lengths.

use crate::{
    metadata::{signatures::TypeSig, token::Token},
    Result,
};

/// Opcode values used by the engine and its tests. Two byte opcodes are stored as
/// `0xFE00 | second byte`.
#[allow(missing_docs)]
pub mod opcodes {
    pub const NOP: u16 = 0x00;
    pub const LDARG_0: u16 = 0x02;
    pub const LDARG_1: u16 = 0x03;
    pub const LDLOC_0: u16 = 0x06;
    pub const STLOC_0: u16 = 0x0A;
    pub const LDNULL: u16 = 0x14;
    pub const LDC_I4_0: u16 = 0x16;
    pub const LDC_I4: u16 = 0x20;
    pub const LDC_I8: u16 = 0x21;
    pub const LDC_R8: u16 = 0x23;
    pub const POP: u16 = 0x26;
    pub const CALL: u16 = 0x28;
    pub const RET: u16 = 0x2A;
    pub const BR: u16 = 0x38;
    pub const BRTRUE: u16 = 0x3A;
    pub const SWITCH: u16 = 0x45;
    pub const CALLVIRT: u16 = 0x6F;
    pub const LDSTR: u16 = 0x72;
    pub const NEWOBJ: u16 = 0x73;
    pub const CASTCLASS: u16 = 0x74;
    pub const ISINST: u16 = 0x75;
    pub const THROW: u16 = 0x7A;
    pub const LDFLD: u16 = 0x7B;
    pub const STFLD: u16 = 0x7D;
    pub const LDSFLD: u16 = 0x7E;
    pub const STSFLD: u16 = 0x80;
    pub const BOX: u16 = 0x8C;
    pub const NEWARR: u16 = 0x8D;
    pub const LEAVE: u16 = 0xDD;
    pub const LDTOKEN: u16 = 0xD0;
    pub const ENDFINALLY: u16 = 0xDC;
    pub const LDFTN: u16 = 0xFE06;
    pub const INITOBJ: u16 = 0xFE15;
}

/// The operand of one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// 32-bit integer (also local and argument indices)
    I32(i32),
    /// 64-bit integer
    I64(i64),
    /// 64-bit float
    F64(f64),
    /// `ldstr` literal
    String(String),
    /// Metadata token (type, field, method or member reference)
    Token(Token),
    /// Absolute branch target offset
    Branch(u32),
    /// Absolute `switch` target offsets
    Switch(Vec<u32>),
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Offset of the instruction in the method body
    pub offset: u32,
    /// Opcode, see [`opcodes`]
    pub opcode: u16,
    /// Operand
    pub operand: Operand,
}

impl Instruction {
    /// Creates an instruction.
    #[must_use]
    pub fn new(offset: u32, opcode: u16, operand: Operand) -> Self {
        Instruction {
            offset,
            opcode,
            operand,
        }
    }
}

/// Kind of an exception handling clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionHandlerKind {
    /// Typed `catch`
    Catch,
    /// `filter` block
    Filter,
    /// `finally` block
    Finally,
    /// `fault` block
    Fault,
}

/// An exception handling clause.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Clause kind
    pub kind: ExceptionHandlerKind,
    /// Start of the protected region
    pub try_offset: u32,
    /// Length of the protected region
    pub try_length: u32,
    /// Start of the handler
    pub handler_offset: u32,
    /// Length of the handler
    pub handler_length: u32,
    /// Caught exception type for [`ExceptionHandlerKind::Catch`]
    pub catch_type: Option<Token>,
    /// Filter start for [`ExceptionHandlerKind::Filter`]
    pub filter_offset: u32,
}

/// A source location mapped to an IL offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequencePoint {
    /// IL offset
    pub offset: u32,
    /// Source document path
    pub document: String,
    /// First line
    pub start_line: u32,
    /// First column
    pub start_column: u16,
    /// Last line
    pub end_line: u32,
    /// Last column
    pub end_column: u16,
}

/// The body of a method.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero initialize locals
    pub init_locals: bool,
    /// Local variable types
    pub locals: Vec<TypeSig>,
    /// Instruction stream
    pub instructions: Vec<Instruction>,
    /// Exception handling clauses
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Debug sequence points, empty when stripped
    pub sequence_points: Vec<SequencePoint>,
}

impl MethodBody {
    /// Calls `f` for every token the body references: locals, instruction operands and catch
    /// types.
    pub fn visit_tokens(&self, f: &mut impl FnMut(Token)) {
        for local in &self.locals {
            local.visit_tokens(f);
        }
        for instruction in &self.instructions {
            if let Operand::Token(token) = instruction.operand {
                f(token);
            }
        }
        for handler in &self.exception_handlers {
            if let Some(token) = handler.catch_type {
                f(token);
            }
        }
    }

    /// Returns a copy with every referenced token replaced through `f`.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn map_tokens(&self, f: &mut impl FnMut(Token) -> Result<Token>) -> Result<MethodBody> {
        let locals = self
            .locals
            .iter()
            .map(|local| local.map_tokens(f))
            .collect::<Result<Vec<_>>>()?;

        let mut instructions = Vec::with_capacity(self.instructions.len());
        for instruction in &self.instructions {
            let operand = match &instruction.operand {
                Operand::Token(token) => Operand::Token(f(*token)?),
                other => other.clone(),
            };
            instructions.push(Instruction::new(
                instruction.offset,
                instruction.opcode,
                operand,
            ));
        }

        let mut exception_handlers = self.exception_handlers.clone();
        for handler in &mut exception_handlers {
            if let Some(token) = handler.catch_type {
                handler.catch_type = Some(f(token)?);
            }
        }

        Ok(MethodBody {
            max_stack: self.max_stack,
            init_locals: self.init_locals,
            locals,
            instructions,
            exception_handlers,
            sequence_points: self.sequence_points.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> MethodBody {
        MethodBody {
            max_stack: 2,
            init_locals: true,
            locals: vec![TypeSig::Class(Token(0x0100_0001))],
            instructions: vec![
                Instruction::new(0, opcodes::LDSTR, Operand::String("hi".into())),
                Instruction::new(5, opcodes::CALL, Operand::Token(Token(0x0A00_0001))),
                Instruction::new(10, opcodes::RET, Operand::None),
            ],
            exception_handlers: vec![ExceptionHandler {
                kind: ExceptionHandlerKind::Catch,
                try_offset: 0,
                try_length: 10,
                handler_offset: 10,
                handler_length: 1,
                catch_type: Some(Token(0x0100_0002)),
                filter_offset: 0,
            }],
            sequence_points: Vec::new(),
        }
    }

    #[test]
    fn test_visit_tokens() {
        let mut seen = Vec::new();
        sample_body().visit_tokens(&mut |token| seen.push(token));
        assert_eq!(
            seen,
            vec![Token(0x0100_0001), Token(0x0A00_0001), Token(0x0100_0002)]
        );
    }

    #[test]
    fn test_map_tokens_keeps_offsets() {
        let body = sample_body();
        let mapped = body
            .map_tokens(&mut |token| Ok(Token(token.value() + 1)))
            .unwrap();

        assert_eq!(mapped.locals, vec![TypeSig::Class(Token(0x0100_0002))]);
        assert_eq!(
            mapped.instructions[1].operand,
            Operand::Token(Token(0x0A00_0002))
        );
        assert_eq!(mapped.instructions[1].offset, 5);
        assert_eq!(mapped.exception_handlers[0].catch_type, Some(Token(0x0100_0003)));
        assert_eq!(mapped.instructions[0], body.instructions[0]);
    }
}
