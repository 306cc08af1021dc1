use crate::jvm::{BaseType, FieldType, MethodType};

/// Machine-level value types
///
/// This is deliberately smaller than the JVM type system: once lowering starts, booleans and
/// bytes live in the same registers and the distinction that matters is width and whether the
/// value is a pointer the collector needs to know about.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum IrType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr,
}

impl IrType {
    /// The IR type a value of the given JVM type lowers to, or `None` for void
    pub fn for_field_type(field_type: &FieldType) -> Option<IrType> {
        let typ = match field_type {
            FieldType::Base(BaseType::Boolean) | FieldType::Base(BaseType::Byte) => IrType::I8,
            FieldType::Base(BaseType::Char) | FieldType::Base(BaseType::Short) => IrType::I16,
            FieldType::Base(BaseType::Int) => IrType::I32,
            FieldType::Base(BaseType::Long) => IrType::I64,
            FieldType::Base(BaseType::Float) => IrType::F32,
            FieldType::Base(BaseType::Double) => IrType::F64,
            FieldType::Base(BaseType::Void) => return None,
            FieldType::Object(_) | FieldType::Array(_) => IrType::Ptr,
        };
        Some(typ)
    }
}

/// Properties of the compilation target that lowering decisions depend on
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct TargetLayout {
    /// Size of a pointer in bytes
    pub pointer_size: usize,
}

impl Default for TargetLayout {
    fn default() -> Self {
        TargetLayout { pointer_size: 8 }
    }
}

impl TargetLayout {
    /// The integer type as wide as a pointer
    pub fn pointer_sized_int(&self) -> IrType {
        match self.pointer_size {
            4 => IrType::I32,
            _ => IrType::I64,
        }
    }
}

/// Signature of an IR function or call site
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature {
    pub parameters: Vec<IrType>,
    /// `None` corresponds to a void function
    pub return_type: Option<IrType>,
}

impl Signature {
    pub fn new(parameters: Vec<IrType>, return_type: Option<IrType>) -> Signature {
        Signature {
            parameters,
            return_type,
        }
    }

    /// Lower a JVM method descriptor into a call signature
    ///
    /// `has_this` prepends the receiver pointer, as every non-static call must.
    pub fn of_method_type(method_type: &MethodType, has_this: bool) -> Signature {
        let mut parameters = Vec::with_capacity(method_type.parameters.len() + 1);
        if has_this {
            parameters.push(IrType::Ptr);
        }
        for parameter in &method_type.parameters {
            match IrType::for_field_type(parameter) {
                Some(typ) => parameters.push(typ),
                None => panic!("`void` is not a parameter type"),
            }
        }
        Signature {
            parameters,
            return_type: IrType::for_field_type(&method_type.return_type),
        }
    }
}
