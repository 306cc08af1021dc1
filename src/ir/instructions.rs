use super::types::{IrType, Signature};
use std::fmt;

/// Opaque id of an IR value
///
/// Function parameters get the first ids; every result-producing instruction defines a fresh one.
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Value(pub(crate) u32);

impl fmt::Debug for Value {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("v{}", self.0))
    }
}

/// Opaque label of a basic block
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct Block(pub(crate) u32);

impl Block {
    /// Label of the first block in a function
    pub const ENTRY: Block = Block(0);
}

impl fmt::Debug for Block {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("b{}", self.0))
    }
}

/// Straight-line instructions (the body of a basic block)
#[derive(Clone, PartialEq, Debug)]
pub enum Instruction {
    /// Integer constant of the given type
    IConst { ty: IrType, value: i64 },

    /// Pointer constant (an address known at compile time, eg. a class object)
    PtrConst { address: usize },

    /// Pointer to an interned constant string (diagnostics for trap calls)
    StrConst { value: String },

    /// Unspecified value of the given type; only emitted after code that cannot return
    Undef { ty: IrType },

    /// Pointer-wide stack slot, stable for the duration of the function
    Alloca,

    /// `base` advanced by `offset` bytes
    PtrAdd { base: Value, offset: Value },

    Load { ty: IrType, address: Value },

    Store { value: Value, address: Value },

    /// Equality comparison, producing an `I8` that is 0 or 1
    ICmpEq { lhs: Value, rhs: Value },

    /// Call to a named symbol, resolved by the JIT linker
    CallSymbol {
        symbol: String,
        signature: Signature,
        arguments: Vec<Value>,
    },

    /// Call through a function pointer
    CallIndirect {
        callee: Value,
        signature: Signature,
        arguments: Vec<Value>,
    },
}

/// Block-closing instructions
#[derive(Clone, PartialEq, Debug)]
pub enum BranchInstruction {
    Branch(Block),
    CondBranch {
        condition: Value,
        if_true: Block,
        if_false: Block,
    },
    Return(Option<Value>),
    /// Control never reaches past this point (the preceding call traps)
    Unreachable,
}

/// A basic block: straight-line instructions closed off by exactly one branch
///
/// Each instruction is stored alongside the value it defines (if it defines one), so finished
/// functions can be inspected without replaying the builder's bookkeeping.
#[derive(Clone, PartialEq, Debug)]
pub struct BasicBlock {
    pub instructions: Vec<(Option<Value>, Instruction)>,
    pub branch_end: BranchInstruction,
}

/// A finished IR function
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    blocks: Vec<BasicBlock>,
    value_types: Vec<IrType>,
}

impl Function {
    pub(crate) fn new(
        name: String,
        signature: Signature,
        blocks: Vec<BasicBlock>,
        value_types: Vec<IrType>,
    ) -> Function {
        Function {
            name,
            signature,
            blocks,
            value_types,
        }
    }

    /// Blocks in creation order; the entry block is first
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn entry_block(&self) -> &BasicBlock {
        &self.blocks[0]
    }

    /// Type of a value defined in this function
    pub fn value_type(&self, value: Value) -> IrType {
        self.value_types[value.0 as usize]
    }

    /// All straight-line instructions, in block order
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks
            .iter()
            .flat_map(|block| block.instructions.iter().map(|(_, insn)| insn))
    }

    /// The instruction that defined `value`, if any (parameters have none)
    pub fn defining_instruction(&self, value: Value) -> Option<&Instruction> {
        self.blocks.iter().find_map(|block| {
            block
                .instructions
                .iter()
                .find(|(result, _)| *result == Some(value))
                .map(|(_, insn)| insn)
        })
    }

    /// Names of all symbols this function calls
    pub fn called_symbols(&self) -> impl Iterator<Item = &str> {
        self.instructions().filter_map(|insn| match insn {
            Instruction::CallSymbol { symbol, .. } => Some(symbol.as_str()),
            _ => None,
        })
    }

    pub fn calls_symbol(&self, symbol: &str) -> bool {
        self.called_symbols().any(|called| called == symbol)
    }
}
