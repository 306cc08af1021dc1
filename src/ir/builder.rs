use super::instructions::{BasicBlock, Block, BranchInstruction, Function, Instruction, Value};
use super::types::{IrType, Signature};

/// Builds a [`Function`] block by block
///
/// The builder starts out positioned in the entry block. Straight-line instructions append to the
/// current block; a branch closes it. Building is positional rather than structured: create the
/// blocks you need up front, close the current block with a branch to one of them, then
/// [`switch_to_block`](FunctionBuilder::switch_to_block) and keep appending.
///
/// Misuse (appending to a closed block, finishing with an open block) is a bug in the caller and
/// fails an internal invariant.
pub struct FunctionBuilder {
    name: String,
    signature: Signature,
    blocks: Vec<BlockInProgress>,
    current_block: Block,
    value_types: Vec<IrType>,
}

struct BlockInProgress {
    instructions: Vec<(Option<Value>, Instruction)>,
    branch_end: Option<BranchInstruction>,
}

impl BlockInProgress {
    fn new() -> BlockInProgress {
        BlockInProgress {
            instructions: vec![],
            branch_end: None,
        }
    }
}

impl FunctionBuilder {
    /// Create a builder for a new function; parameters become the first values
    pub fn new(name: impl Into<String>, signature: Signature) -> FunctionBuilder {
        let value_types = signature.parameters.clone();
        FunctionBuilder {
            name: name.into(),
            signature,
            blocks: vec![BlockInProgress::new()],
            current_block: Block::ENTRY,
            value_types,
        }
    }

    /// Value of the `index`th parameter
    pub fn parameter(&self, index: usize) -> Value {
        assert!(
            index < self.signature.parameters.len(),
            "no parameter {} in {:?}",
            index,
            self.signature,
        );
        Value(index as u32)
    }

    /// Values of all parameters, in order
    pub fn parameters(&self) -> Vec<Value> {
        (0..self.signature.parameters.len())
            .map(|index| Value(index as u32))
            .collect()
    }

    /// Type of any value defined so far
    pub fn value_type(&self, value: Value) -> IrType {
        self.value_types[value.0 as usize]
    }

    pub fn current_block(&self) -> Block {
        self.current_block
    }

    fn push(&mut self, result_type: Option<IrType>, instruction: Instruction) -> Option<Value> {
        let block = &mut self.blocks[self.current_block.0 as usize];
        assert!(
            block.branch_end.is_none(),
            "instruction after the end of {:?}",
            self.current_block,
        );
        let result = result_type.map(|ty| {
            let value = Value(self.value_types.len() as u32);
            self.value_types.push(ty);
            value
        });
        self.blocks[self.current_block.0 as usize]
            .instructions
            .push((result, instruction));
        result
    }

    fn push_value(&mut self, ty: IrType, instruction: Instruction) -> Value {
        match self.push(Some(ty), instruction) {
            Some(value) => value,
            None => unreachable!("result-producing instruction without a result"),
        }
    }

    pub fn iconst(&mut self, ty: IrType, value: i64) -> Value {
        self.push_value(ty, Instruction::IConst { ty, value })
    }

    pub fn ptr_const(&mut self, address: usize) -> Value {
        self.push_value(IrType::Ptr, Instruction::PtrConst { address })
    }

    pub fn str_const(&mut self, value: impl Into<String>) -> Value {
        self.push_value(
            IrType::Ptr,
            Instruction::StrConst {
                value: value.into(),
            },
        )
    }

    pub fn undef(&mut self, ty: IrType) -> Value {
        self.push_value(ty, Instruction::Undef { ty })
    }

    pub fn alloca(&mut self) -> Value {
        self.push_value(IrType::Ptr, Instruction::Alloca)
    }

    pub fn ptr_add(&mut self, base: Value, offset: Value) -> Value {
        self.push_value(IrType::Ptr, Instruction::PtrAdd { base, offset })
    }

    pub fn load(&mut self, ty: IrType, address: Value) -> Value {
        self.push_value(ty, Instruction::Load { ty, address })
    }

    pub fn store(&mut self, value: Value, address: Value) {
        self.push(None, Instruction::Store { value, address });
    }

    pub fn icmp_eq(&mut self, lhs: Value, rhs: Value) -> Value {
        self.push_value(IrType::I8, Instruction::ICmpEq { lhs, rhs })
    }

    /// Call a named symbol; returns a value unless the signature is void
    pub fn call_symbol(
        &mut self,
        symbol: impl Into<String>,
        signature: Signature,
        arguments: Vec<Value>,
    ) -> Option<Value> {
        let result_type = signature.return_type;
        self.push(
            result_type,
            Instruction::CallSymbol {
                symbol: symbol.into(),
                signature,
                arguments,
            },
        )
    }

    /// Call through a function pointer; returns a value unless the signature is void
    pub fn call_indirect(
        &mut self,
        callee: Value,
        signature: Signature,
        arguments: Vec<Value>,
    ) -> Option<Value> {
        let result_type = signature.return_type;
        self.push(
            result_type,
            Instruction::CallIndirect {
                callee,
                signature,
                arguments,
            },
        )
    }

    /// Create a new (empty, unplaced) block
    pub fn create_block(&mut self) -> Block {
        let block = Block(self.blocks.len() as u32);
        self.blocks.push(BlockInProgress::new());
        block
    }

    /// Continue appending instructions into `block`
    pub fn switch_to_block(&mut self, block: Block) {
        assert!(
            self.blocks[block.0 as usize].branch_end.is_none(),
            "{:?} is already closed",
            block,
        );
        self.current_block = block;
    }

    fn close_block(&mut self, branch_end: BranchInstruction) {
        let block = &mut self.blocks[self.current_block.0 as usize];
        assert!(
            block.branch_end.is_none(),
            "{:?} is already closed",
            self.current_block,
        );
        block.branch_end = Some(branch_end);
    }

    pub fn branch(&mut self, target: Block) {
        self.close_block(BranchInstruction::Branch(target));
    }

    pub fn cond_branch(&mut self, condition: Value, if_true: Block, if_false: Block) {
        self.close_block(BranchInstruction::CondBranch {
            condition,
            if_true,
            if_false,
        });
    }

    pub fn ret(&mut self, value: Option<Value>) {
        self.close_block(BranchInstruction::Return(value));
    }

    /// Close the current block as unreachable (the preceding call never returns)
    pub fn unreachable(&mut self) {
        self.close_block(BranchInstruction::Unreachable);
    }

    /// Turn the builder into a finished function
    pub fn finish(self) -> Function {
        let blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(index, block)| match block.branch_end {
                Some(branch_end) => BasicBlock {
                    instructions: block.instructions,
                    branch_end,
                },
                None => panic!("{:?} was never closed", Block(index as u32)),
            })
            .collect();
        Function::new(self.name, self.signature, blocks, self.value_types)
    }
}
