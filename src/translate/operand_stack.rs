use crate::ir::{FunctionBuilder, IrType, Value};

/// The JVM operand stack, as seen by the bytecode-to-IR translator
///
/// Every stack position is backed by a stable stack slot allocated up front (one per position up
/// to the method's `max_stack`), so a value pushed on one control-flow path can be popped on
/// another. What the JVM leaves polymorphic is the *type* held in a slot, which can differ
/// between visits of the same program point; the stack therefore records the type stored in each
/// live slot and loads through it on pop.
///
/// The current shape (types and depth) can be saved and restored so that the translator can
/// revisit a block from a new predecessor with the exact stack shape the block was first
/// translated with, instead of re-inferring it.
///
/// Verified bytecode never pops an empty stack or overflows `max_stack`; violating that here is
/// a translator bug and fails an internal invariant.
pub struct OperandStack {
    /// One stack slot per position, allocated up front
    slots: Vec<Value>,

    /// Type currently held in each live slot
    types: Vec<IrType>,

    top_of_stack: usize,
}

/// Snapshot of the operand stack shape at one program point
#[derive(Clone)]
pub struct StackState {
    types: Vec<IrType>,
    top_of_stack: usize,
}

impl OperandStack {
    pub fn new(builder: &mut FunctionBuilder, max_stack: u16) -> OperandStack {
        let slots = (0..max_stack).map(|_| builder.alloca()).collect();
        OperandStack {
            slots,
            // Slots above the top of stack are dead; the placeholder type is never loaded
            types: vec![IrType::Ptr; max_stack as usize],
            top_of_stack: 0,
        }
    }

    /// Store `value` into the next free slot and record its type
    pub fn push(&mut self, builder: &mut FunctionBuilder, value: Value) {
        let slot = self.slots[self.top_of_stack];
        self.types[self.top_of_stack] = builder.value_type(value);
        self.top_of_stack += 1;
        builder.store(value, slot);
    }

    /// Load the value on top of the stack back out of its slot
    pub fn pop(&mut self, builder: &mut FunctionBuilder) -> Value {
        self.pop_with_type(builder).0
    }

    /// As [`pop`](OperandStack::pop), but also return the recorded type
    pub fn pop_with_type(&mut self, builder: &mut FunctionBuilder) -> (Value, IrType) {
        self.top_of_stack -= 1;
        let slot = self.slots[self.top_of_stack];
        let ty = self.types[self.top_of_stack];
        (builder.load(ty, slot), ty)
    }

    /// Number of live stack positions
    pub fn depth(&self) -> usize {
        self.top_of_stack
    }

    /// Snapshot the current stack shape
    pub fn save_state(&self) -> StackState {
        StackState {
            types: self.types.clone(),
            top_of_stack: self.top_of_stack,
        }
    }

    /// Replace the current stack shape with a snapshot
    pub fn restore_state(&mut self, state: StackState) {
        self.types = state.types;
        self.top_of_stack = state.top_of_stack;
    }

    /// The canonical stack shape on entry to an exception handler: the caught exception
    /// reference alone, at depth 1
    pub fn handler_state(&self) -> StackState {
        let mut types = self.types.clone();
        types[0] = IrType::Ptr;
        StackState {
            types,
            top_of_stack: 1,
        }
    }

    /// Store the caught exception into the bottom slot, overwriting whatever type was there
    pub fn set_handler_stack(&mut self, builder: &mut FunctionBuilder, value: Value) {
        let slot = self.slots[0];
        self.types[0] = builder.value_type(value);
        builder.store(value, slot);
    }
}
