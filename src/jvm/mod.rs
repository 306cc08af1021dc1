//! JVM-side value types
//!
//! The descriptor language (section 4.3 of the JVM specification) and the access flags consulted
//! during method resolution and object layout. Everything here is a plain value: parsed once,
//! compared structurally, rendered back byte-for-byte.

mod access_flags;
mod descriptors;

pub use access_flags::*;
pub use descriptors::*;
