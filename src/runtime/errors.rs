/// A class that could not be located by the loader
///
/// This is the loader-level fact; whether it surfaces as a `NoClassDefFoundError` (through a
/// materialized throwing stub) or is handled some other way is up to the caller.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ClassNotFound {
    /// Field descriptor of the missing type
    pub descriptor: String,
}

impl ClassNotFound {
    pub fn new(descriptor: impl Into<String>) -> ClassNotFound {
        ClassNotFound {
            descriptor: descriptor.into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Error {
    ClassNotFound(ClassNotFound),

    /// Two declarations claim the same binary name (indicates a broken class path)
    DuplicateClass(String),
}

impl From<ClassNotFound> for Error {
    fn from(not_found: ClassNotFound) -> Error {
        Error::ClassNotFound(not_found)
    }
}
