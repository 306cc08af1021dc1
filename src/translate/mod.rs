//! Bytecode-to-IR translation support
//!
//! The pieces the bytecode walker leans on: the operand stack it threads values through, the
//! stub-symbol mangling scheme that names deferred VM operations, and the lazy class-loader
//! helper that decides, per reference, between direct IR and a stub call.

mod lazy;
mod mangling;
mod operand_stack;

pub use lazy::*;
pub use mangling::*;
pub use operand_stack::*;

pub(crate) use mangling::mangle_member_symbol;
