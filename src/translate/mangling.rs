//! Mangling and demangling of stub symbol names
//!
//! The compiler cannot assume that a class whose method it calls or whose field it reads has
//! been loaded, so instead of baking metadata into the emitted code it encodes the whole request
//! into the *name* of the symbol it calls. The JIT linker's symbol table becomes the rendezvous
//! point: when native execution first reaches such a symbol, the materialization callback
//! demangles the name, loads the class, and registers a real definition. This decouples
//! bytecode-to-IR lowering from the rest of the VM completely.
//!
//! The grammars all share the descriptor alphabet and are distinguished by unique textual
//! prefixes, with one deliberate exception: direct calls carry no prefix, which makes them
//! indistinguishable from field accesses except by descriptor shape (method descriptors start
//! with `(`). Direct calls are terminal - there is nothing to materialize - so the demangler
//! reports them as unrecognized.

use crate::jvm::{take_field_type, take_method_type, FieldType, MethodType, RenderDescriptor};

/// How the target of an indirect call is resolved
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum MethodResolution {
    /// 5.4.3.3. Method Resolution from the JVM Spec.
    Virtual,
    /// 5.4.3.4. Interface Method Resolution from the JVM Spec.
    Interface,
    /// 6.5 `invokespecial`: Method resolution from the JVM Spec.
    Special,
}

impl MethodResolution {
    fn prefix(&self) -> &'static str {
        match self {
            MethodResolution::Virtual => "Virtual Call to ",
            MethodResolution::Interface => "Interface Call to ",
            MethodResolution::Special => "Special Call to ",
        }
    }
}

const STATIC_CALL_PREFIX: &str = "Static Call to ";
const CLASS_OBJECT_PREFIX: &str = "Load ";

/// `<class-name> '.' <member-name> ':' <descriptor>` - the shared core of the member grammars
pub(crate) fn mangle_member_symbol(
    class_name: &str,
    member_name: &str,
    descriptor: &str,
) -> String {
    format!("{}.{}:{}", class_name, member_name, descriptor)
}

/// Mangling for calling a given Java method directly. This does not perform any lookups or class
/// loading but rather assumes that the given method with the given type MUST exist in the
/// already loaded class. The function signature of the call must match the method descriptor
/// with the `this` object as first argument for non-static methods.
///
/// Syntax:
/// `<direct-call> ::= <class-name> '.' <method-name> ':' <method-descriptor>`
pub fn mangle_direct_method_call(
    class_name: &str,
    method_name: &str,
    descriptor: &MethodType,
) -> String {
    mangle_member_symbol(class_name, method_name, &descriptor.render())
}

/// Mangling for calling a function returning either the address of a static field or the offset
/// of an instance field. The caller must know whether the field is static or an instance field
/// and use the corresponding function signature:
///
/// - Instance field: `() -> ` pointer-width integer
/// - Static field: `() -> ptr`
///
/// Syntax:
/// `<field-access> ::= <class-name> '.' <field-name> ':' <field-descriptor>`
pub fn mangle_field_access(class_name: &str, field_name: &str, descriptor: &FieldType) -> String {
    mangle_member_symbol(class_name, field_name, &descriptor.render())
}

/// Mangling for calling a function performing method resolution and then calling the resolved
/// method. The function signature of the call must match the method descriptor with the `this`
/// object as first argument.
///
/// Syntax:
/// `<method-resolution-call> ::= <method-resolution> <direct-call>`
/// `<method-resolution> ::= 'Virtual Call to ' | 'Interface Call to ' | 'Special Call to '`
pub fn mangle_method_resolution_call(
    resolution: MethodResolution,
    class_name: &str,
    method_name: &str,
    descriptor: &MethodType,
) -> String {
    let mut symbol = resolution.prefix().to_owned();
    symbol.push_str(&mangle_direct_method_call(class_name, method_name, descriptor));
    symbol
}

/// Mangling for calling a function performing static method resolution and then calling the
/// resolved method.
///
/// Syntax:
/// `<static-call> ::= 'Static Call to ' <direct-call>`
pub fn mangle_static_call(class_name: &str, method_name: &str, descriptor: &MethodType) -> String {
    let mut symbol = STATIC_CALL_PREFIX.to_owned();
    symbol.push_str(&mangle_direct_method_call(class_name, method_name, descriptor));
    symbol
}

/// Mangling for calling a function returning a loaded class object. The function signature of
/// the call must be `() -> ptr`.
///
/// Syntax:
/// `<class-object-access> ::= 'Load ' <field-descriptor>`
pub fn mangle_class_object_access(descriptor: &FieldType) -> String {
    let mut symbol = CLASS_OBJECT_PREFIX.to_owned();
    descriptor.render_to(&mut symbol);
    symbol
}

/// A stub symbol recovered by [`demangle_stub_symbol_name`]
///
/// All strings borrow from the symbol name that was demangled.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DemangledStubSymbol<'a> {
    /// A call produced via [`mangle_field_access`]
    FieldAccess {
        class_name: &'a str,
        field_name: &'a str,
        descriptor: FieldType<'a>,
    },

    /// A call produced via [`mangle_method_resolution_call`]
    MethodResolutionCall {
        resolution: MethodResolution,
        class_name: &'a str,
        method_name: &'a str,
        descriptor: MethodType<'a>,
    },

    /// A call produced via [`mangle_static_call`]
    StaticCall {
        class_name: &'a str,
        method_name: &'a str,
        descriptor: MethodType<'a>,
    },

    /// A call produced via [`mangle_class_object_access`]
    ClassObjectLoad(FieldType<'a>),
}

/// Attempts to demangle a symbol produced by any of the `mangle_*` functions above with the
/// exception of [`mangle_direct_method_call`]. Returns `None` if the symbol name is not the
/// output of any of these functions.
pub fn demangle_stub_symbol_name(symbol_name: &str) -> Option<DemangledStubSymbol> {
    for resolution in [
        MethodResolution::Virtual,
        MethodResolution::Interface,
        MethodResolution::Special,
    ] {
        if let Some(rest) = symbol_name.strip_prefix(resolution.prefix()) {
            let (class_name, method_name, descriptor) = split_member_symbol(rest)?;
            return Some(DemangledStubSymbol::MethodResolutionCall {
                resolution,
                class_name,
                method_name,
                descriptor: demangle_method_descriptor(descriptor)?,
            });
        }
    }

    if let Some(rest) = symbol_name.strip_prefix(STATIC_CALL_PREFIX) {
        let (class_name, method_name, descriptor) = split_member_symbol(rest)?;
        return Some(DemangledStubSymbol::StaticCall {
            class_name,
            method_name,
            descriptor: demangle_method_descriptor(descriptor)?,
        });
    }

    if let Some(rest) = symbol_name.strip_prefix(CLASS_OBJECT_PREFIX) {
        return Some(DemangledStubSymbol::ClassObjectLoad(
            demangle_field_descriptor(rest)?,
        ));
    }

    // No prefix: a field access, or a direct call (which is terminal and stays unrecognized).
    // The two are distinguished by descriptor shape alone.
    let (class_name, field_name, descriptor) = split_member_symbol(symbol_name)?;
    if descriptor.starts_with('(') {
        return None;
    }
    Some(DemangledStubSymbol::FieldAccess {
        class_name,
        field_name,
        descriptor: demangle_field_descriptor(descriptor)?,
    })
}

/// Split `<class-name> '.' <member-name> ':' <descriptor>`
///
/// Class names never contain `.` and descriptors never contain `:`, so the last `.` before the
/// first `:` is unambiguous.
fn split_member_symbol(symbol: &str) -> Option<(&str, &str, &str)> {
    let colon = symbol.find(':')?;
    let dot = symbol[..colon].rfind('.')?;
    let class_name = &symbol[..dot];
    let member_name = &symbol[dot + 1..colon];
    let descriptor = &symbol[colon + 1..];
    if class_name.is_empty() || member_name.is_empty() {
        return None;
    }
    Some((class_name, member_name, descriptor))
}

fn demangle_field_descriptor(descriptor: &str) -> Option<FieldType> {
    let mut source = descriptor;
    let field_type = take_field_type(&mut source)?;
    source.is_empty().then(|| field_type)
}

fn demangle_method_descriptor(descriptor: &str) -> Option<MethodType> {
    let mut source = descriptor;
    let method_type = take_method_type(&mut source)?;
    source.is_empty().then(|| method_type)
}
