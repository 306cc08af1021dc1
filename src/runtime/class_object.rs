use crate::jvm::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::util::RefId;
use elsa::FrozenVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

/// Byte offset of the initialization-state byte within a class object.
///
/// Emitted class-initializer gates load this byte and compare it against
/// [`CLASS_INITIALIZED`]; the offset is part of the contract between the compiler and the
/// runtime, which is why [`ClassObject`] is `#[repr(C)]` with the state byte first.
pub const CLASS_INIT_STATE_OFFSET: usize = 0;

/// Byte offset of the v-table base pointer within a class object.
pub const CLASS_VTABLE_PTR_OFFSET: usize = 8;

/// Initialization-state sentinel: the class initializer has not run yet.
pub const CLASS_UNINITIALIZED: u8 = 0;

/// Initialization-state sentinel: the class initializer has completed.
pub const CLASS_INITIALIZED: u8 = 1;

/// Byte offset of the class-object pointer within an object header.
pub const OBJECT_CLASS_OFFSET: usize = 0;

/// Reference to a loaded class object
pub type ClassId<'g> = RefId<'g, ClassObject<'g>>;

/// Reference to a method of a loaded class
pub type MethodId<'g> = RefId<'g, MethodInfo<'g>>;

/// Reference to a field of a loaded class
pub type FieldId<'g> = RefId<'g, FieldInfo<'g>>;

/// Runtime metadata for one loaded class, interface, array, or primitive type
///
/// The first two fields are the pieces native code reads directly (through the offsets above);
/// everything after them is compiler-side metadata with no layout guarantees.
#[repr(C)]
pub struct ClassObject<'g> {
    /// Must stay the first field: emitted gates read it at [`CLASS_INIT_STATE_OFFSET`]
    pub(crate) init_state: AtomicU8,

    /// Address of the native v-table (one code pointer per slot); second field, read at
    /// [`CLASS_VTABLE_PTR_OFFSET`]
    pub(crate) vtable_ptr: AtomicUsize,

    /// Binary name, or the field descriptor for primitive and array types
    pub(crate) name: String,

    /// Superclass; `None` for `java/lang/Object`, interfaces without one, and primitives
    pub(crate) superclass: Option<ClassId<'g>>,

    /// Directly implemented (or extended) interfaces
    pub(crate) interfaces: Vec<ClassId<'g>>,

    pub(crate) access_flags: ClassAccessFlags,

    /// Component type for array classes
    pub(crate) component_type: Option<ClassId<'g>>,

    /// Loader-assigned id for interface dispatch; `Some` exactly for interfaces
    pub(crate) interface_id: Option<usize>,

    /// Size of an instance in bytes, including the object header
    pub(crate) instance_size: usize,

    pub(crate) primitive: bool,

    pub(crate) methods: FrozenVec<MethodId<'g>>,

    pub(crate) fields: FrozenVec<FieldId<'g>>,

    /// Dispatch-table metadata, one entry per slot (i-table entries for interfaces)
    pub(crate) table: FrozenVec<MethodId<'g>>,

    /// Backing storage for the native v-table; entries are filled in as methods are compiled
    pub(crate) vtable_code: Box<[AtomicU64]>,

    /// One pointer-wide cell per static field
    pub(crate) statics: Box<[AtomicU64]>,
}

impl<'g> ClassObject<'g> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn superclass(&self) -> Option<ClassId<'g>> {
        self.superclass
    }

    pub fn interfaces(&self) -> &[ClassId<'g>] {
        &self.interfaces
    }

    pub fn access_flags(&self) -> ClassAccessFlags {
        self.access_flags
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_array(&self) -> bool {
        self.component_type.is_some()
    }

    pub fn is_primitive(&self) -> bool {
        self.primitive
    }

    pub fn component_type(&self) -> Option<ClassId<'g>> {
        self.component_type
    }

    pub fn interface_id(&self) -> Option<usize> {
        self.interface_id
    }

    pub fn instance_size(&self) -> usize {
        self.instance_size
    }

    pub fn is_initialized(&self) -> bool {
        self.init_state.load(Ordering::Acquire) == CLASS_INITIALIZED
    }

    pub(crate) fn mark_initialized(&self) {
        self.init_state.store(CLASS_INITIALIZED, Ordering::Release);
    }

    /// Address of this class object (stable: class objects are arena-allocated)
    pub fn address(&self) -> usize {
        self as *const Self as usize
    }

    /// Address of the native v-table
    pub fn vtable_address(&self) -> usize {
        self.vtable_ptr.load(Ordering::Relaxed)
    }

    /// Number of dispatch-table slots
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Address of the storage cell backing a static field
    pub fn static_field_address(&self, slot: usize) -> usize {
        &self.statics[slot] as *const AtomicU64 as usize
    }
}

impl<'g> fmt::Debug for ClassObject<'g> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl<'g> ClassId<'g> {
    /// Find a method declared by this class (not inherited)
    pub fn method(&self, name: &str, descriptor: &str) -> Option<MethodId<'g>> {
        self.0
            .methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
            .map(RefId)
    }

    /// Find a method in this class or its superclasses
    pub fn method_in_hierarchy(&self, name: &str, descriptor: &str) -> Option<MethodId<'g>> {
        let mut next = Some(*self);
        while let Some(class) = next {
            if let Some(method) = class.method(name, descriptor) {
                return Some(method);
            }
            next = class.superclass;
        }
        None
    }

    /// Dispatch-table entry at `slot`
    pub fn table_entry(&self, slot: usize) -> Option<MethodId<'g>> {
        self.0.table.get(slot).map(RefId)
    }

    /// Find a field declared by this class (not inherited)
    pub fn field(&self, name: &str, descriptor: &str) -> Option<FieldId<'g>> {
        self.0
            .fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
            .map(RefId)
    }

    /// Find a field following JVM field resolution order: the class itself, then its
    /// superinterfaces, then its superclass (section 5.4.3.2)
    pub fn field_in_hierarchy(&self, name: &str, descriptor: &str) -> Option<FieldId<'g>> {
        if let Some(field) = self.field(name, descriptor) {
            return Some(field);
        }
        for interface in &self.0.interfaces {
            if let Some(field) = interface.field_in_hierarchy(name, descriptor) {
                return Some(field);
            }
        }
        self.0
            .superclass
            .and_then(|superclass| superclass.field_in_hierarchy(name, descriptor))
    }

    /// All superinterfaces (direct and transitive, including those of superclasses),
    /// deduplicated
    pub fn superinterfaces(&self) -> Vec<ClassId<'g>> {
        let mut found: Vec<ClassId<'g>> = vec![];
        let mut to_visit: Vec<ClassId<'g>> = vec![*self];
        while let Some(class) = to_visit.pop() {
            if let Some(superclass) = class.superclass {
                to_visit.push(superclass);
            }
            for &interface in &class.0.interfaces {
                if !found.contains(&interface) {
                    found.push(interface);
                    to_visit.push(interface);
                }
            }
        }
        found
    }
}

/// Metadata for one method of a loaded class
#[derive(Debug)]
pub struct MethodInfo<'g> {
    pub class: ClassId<'g>,

    pub name: String,

    /// Raw method descriptor, kept in its canonical string form
    pub descriptor: String,

    pub access_flags: MethodAccessFlags,

    /// Dispatch-table slot: a v-table slot for class methods, an i-table slot for interface
    /// methods. `None` for static, private, and initializer methods.
    pub table_slot: Option<usize>,
}

impl<'g> MethodInfo<'g> {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    pub fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PRIVATE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }

    /// Is this `<init>` or `<clinit>`?
    pub fn is_initializer(&self) -> bool {
        self.name.starts_with('<')
    }

    /// The symbol under which a direct call to this method links
    pub fn direct_call_symbol(&self) -> String {
        crate::translate::mangle_member_symbol(&self.class.name, &self.name, &self.descriptor)
    }
}

/// Where a field's storage lives
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FieldLocation {
    /// Byte offset within an instance
    Instance { offset: usize },
    /// Index of the class object's static storage cell
    Static { slot: usize },
}

/// Metadata for one field of a loaded class
#[derive(Debug)]
pub struct FieldInfo<'g> {
    pub class: ClassId<'g>,

    pub name: String,

    /// Raw field descriptor, kept in its canonical string form
    pub descriptor: String,

    pub access_flags: FieldAccessFlags,

    pub location: FieldLocation,
}

impl<'g> FieldInfo<'g> {
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }
}
