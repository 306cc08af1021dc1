//! Runtime collaborators of the code generator
//!
//! Class objects and the loader that materializes them, plus the stub registry that stands
//! between compiled code and classes that have not been loaded yet. Object layout, garbage
//! collection, and actually executing `<clinit>` bodies live elsewhere in the VM; this module
//! carries exactly the metadata and publication machinery code generation depends on.

mod class_loader;
mod class_object;
mod errors;
mod stubs;

pub use class_loader::*;
pub use class_object::*;
pub use errors::*;
pub use stubs::*;

/// Runtime entry point that runs a class initializer; takes the class-object pointer.
///
/// This is the slow path of the class-initializer gate: emitted code compares the class object's
/// initialization state against [`CLASS_INITIALIZED`] and only calls here on a miss.
pub const VM_INITIALIZE_CLASS: &str = "vm_initialize_class";

/// Runtime entry point that returns a class's method table for an interface; takes the
/// class-object pointer and the interface id, returns a pointer to the table.
pub const VM_ITABLE_LOOKUP: &str = "vm_itable_lookup";

/// Trap routine raising `java.lang.NoClassDefFoundError`; takes a diagnostic string, never
/// returns.
pub const VM_THROW_NO_CLASS_DEF_FOUND_ERROR: &str = "vm_throw_no_class_def_found_error";

/// Trap routine raising `java.lang.NoSuchMethodError`; takes a diagnostic string, never returns.
pub const VM_THROW_NO_SUCH_METHOD_ERROR: &str = "vm_throw_no_such_method_error";

/// Trap routine raising `java.lang.NoSuchFieldError`; takes a diagnostic string, never returns.
pub const VM_THROW_NO_SUCH_FIELD_ERROR: &str = "vm_throw_no_such_field_error";

/// Trap routine raising `java.lang.AbstractMethodError`; takes a diagnostic string, never
/// returns.
pub const VM_THROW_ABSTRACT_METHOD_ERROR: &str = "vm_throw_abstract_method_error";
