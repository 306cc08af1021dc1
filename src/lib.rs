//! Lower Java bytecode to native code through a lazy, stub-driven JIT pipeline
//!
//! ### The lazy contract
//!
//! Compiled native code routinely refers to classes that have not been loaded yet. The front
//! resolves this tension through the JIT linker's symbol table: every deferred request (call
//! this method, read this field, give me this class object) is encoded into a mangled symbol
//! name ([`translate::mangle_static_call`] and friends), emitted as an ordinary call, and given
//! a definition only when native execution first reaches it. The materialization callback
//! ([`translate::LazyClassLoaderHelper::materialize_stub`]) demangles the name, loads the class
//! through the [`runtime::ClassLoader`], and registers a direct definition in the
//! [`runtime::StubRegistry`] - after which the stub is indistinguishable from code compiled
//! against a loaded class.
//!
//! ### Module tour
//!
//!   - [`jvm`]: descriptors and access flags, the vocabulary everything else speaks
//!   - [`ir`]: the small block-structured IR the translator emits into
//!   - [`runtime`]: class objects, the class loader, and the stub registry
//!   - [`translate`]: the operand stack, the mangling scheme, and the lazy helper itself
//!
//! ### Example
//!
//! ```
//! use jvm2native::ir::{FunctionBuilder, Signature, TargetLayout};
//! use jvm2native::jvm::parse_method_type;
//! use jvm2native::runtime::{ClassLoader, ClassLoaderArenas, StubRegistry};
//! use jvm2native::translate::{IndirectResolution, LazyClassLoaderHelper};
//!
//! let arenas = ClassLoaderArenas::new();
//! let loader = ClassLoader::new(&arenas);
//! let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());
//! let registry = StubRegistry::new(|symbol| helper.materialize_stub(symbol));
//!
//! // Translate an `invokevirtual` against a class nobody has loaded:
//! let mut builder = FunctionBuilder::new(
//!     "example",
//!     Signature::new(vec![jvm2native::ir::IrType::Ptr], None),
//! );
//! let receiver = builder.parameter(0);
//! helper.do_indirect_call(
//!     &mut builder,
//!     "com/example/Greeter",
//!     "greet",
//!     &parse_method_type("()V"),
//!     &[receiver],
//!     IndirectResolution::Virtual,
//! );
//! builder.ret(None);
//! let function = builder.finish();
//!
//! // The emitted code calls a mangled stub; its definition materializes on first resolution
//! // (and here traps, since no such class was ever registered with the loader).
//! assert!(function.calls_symbol("Virtual Call to com/example/Greeter.greet:()V"));
//! assert!(registry.resolve("Virtual Call to com/example/Greeter.greet:()V").is_some());
//! ```

pub mod ir;
pub mod jvm;
pub mod runtime;
pub mod translate;
pub mod util;
