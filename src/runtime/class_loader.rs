use super::class_object::{
    ClassId, ClassObject, FieldInfo, FieldLocation, MethodId, MethodInfo, CLASS_UNINITIALIZED,
};
use super::errors::{ClassNotFound, Error};
use crate::ir::TargetLayout;
use crate::jvm::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::util::RefId;
use elsa::FrozenMap;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use typed_arena::Arena;

/// Declaration of a class, as recovered from its class file
///
/// Class file parsing happens upstream; by the time a declaration reaches the loader it has been
/// validated, so names and descriptors in it are trusted.
#[derive(Debug, Clone)]
pub struct ClassDeclaration {
    pub name: String,
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: ClassAccessFlags,
    pub fields: Vec<FieldDeclaration>,
    pub methods: Vec<MethodDeclaration>,
}

#[derive(Debug, Clone)]
pub struct FieldDeclaration {
    pub name: String,
    pub descriptor: String,
    pub access_flags: FieldAccessFlags,
}

#[derive(Debug, Clone)]
pub struct MethodDeclaration {
    pub name: String,
    pub descriptor: String,
    pub access_flags: MethodAccessFlags,
}

/// Arenas backing all metadata a [`ClassLoader`] creates
///
/// Kept separate from the loader so class, method, and field references can share the arena
/// lifetime `'g` while the loader itself stays borrowable.
pub struct ClassLoaderArenas<'g> {
    class_arena: Arena<ClassObject<'g>>,
    method_arena: Arena<MethodInfo<'g>>,
    field_arena: Arena<FieldInfo<'g>>,
}

impl<'g> ClassLoaderArenas<'g> {
    pub fn new() -> Self {
        ClassLoaderArenas {
            class_arena: Arena::new(),
            method_arena: Arena::new(),
            field_arena: Arena::new(),
        }
    }
}

impl<'g> Default for ClassLoaderArenas<'g> {
    fn default() -> Self {
        Self::new()
    }
}

/// The bootstrap class loader
///
/// Declarations are registered up front (standing in for a class path); class objects are only
/// materialized from them on the first [`for_name`](ClassLoader::for_name), loading superclasses
/// and superinterfaces transitively. Loading computes everything the code generator will ask
/// for: instance field offsets, static storage cells, dispatch-table slots, and interface ids.
///
/// The loaded-class index is keyed by *field descriptor* (`Ljava/lang/String;`, `[I`, `I`), with
/// the nine primitive class objects pre-seeded.
pub struct ClassLoader<'g> {
    arenas: &'g ClassLoaderArenas<'g>,
    loaded: FrozenMap<String, ClassId<'g>>,
    declarations: RefCell<HashMap<String, ClassDeclaration>>,
    next_interface_id: Cell<usize>,
    layout: TargetLayout,
}

impl<'g> ClassLoader<'g> {
    pub fn new(arenas: &'g ClassLoaderArenas<'g>) -> Self {
        let loader = ClassLoader {
            arenas,
            loaded: FrozenMap::new(),
            declarations: RefCell::new(HashMap::new()),
            next_interface_id: Cell::new(0),
            layout: TargetLayout::default(),
        };
        for (descriptor, size) in [
            ("B", 1),
            ("C", 2),
            ("D", 8),
            ("F", 4),
            ("I", 4),
            ("J", 8),
            ("S", 2),
            ("Z", 1),
            ("V", 0),
        ] {
            let class = loader.alloc_class(ClassObject {
                init_state: AtomicU8::new(CLASS_UNINITIALIZED),
                vtable_ptr: AtomicUsize::new(0),
                name: descriptor.to_owned(),
                superclass: None,
                interfaces: vec![],
                access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL,
                component_type: None,
                interface_id: None,
                instance_size: size,
                primitive: true,
                methods: Default::default(),
                fields: Default::default(),
                table: Default::default(),
                vtable_code: Box::new([]),
                statics: Box::new([]),
            });
            // Primitive types have no initializer to run
            class.mark_initialized();
            loader.loaded.insert(descriptor.to_owned(), class);
        }
        loader
    }

    /// Make a class declaration available for loading
    pub fn register(&self, declaration: ClassDeclaration) -> Result<(), Error> {
        let key = object_descriptor(&declaration.name);
        if self.loaded.get(&key).is_some()
            || self.declarations.borrow().contains_key(&declaration.name)
        {
            return Err(Error::DuplicateClass(declaration.name));
        }
        self.declarations
            .borrow_mut()
            .insert(declaration.name.clone(), declaration);
        Ok(())
    }

    /// The class object for `descriptor`, which must be a valid field descriptor, loading it and
    /// transitive dependencies if required
    pub fn for_name(&'g self, descriptor: &str) -> Result<ClassId<'g>, ClassNotFound> {
        if let Some(class) = self.loaded.get(descriptor) {
            return Ok(RefId(class));
        }
        match descriptor.as_bytes().first() {
            Some(b'L') if descriptor.ends_with(';') => {
                self.load_class(&descriptor[1..descriptor.len() - 1])
            }
            Some(b'[') => self.load_array(descriptor),
            _ => Err(ClassNotFound::new(descriptor)),
        }
    }

    /// The class object for `descriptor` if it has been loaded previously
    pub fn for_name_loaded(&'g self, descriptor: &str) -> Option<ClassId<'g>> {
        self.loaded.get(descriptor).map(RefId)
    }

    /// Run the class initializer if it has not run yet (superclasses first, per section 5.5 of
    /// the JVM specification). Idempotent; publication of the initialized state happens-before
    /// any static operation that observes it.
    pub fn initialize(&'g self, class: ClassId<'g>) {
        if class.is_initialized() {
            return;
        }
        if let Some(superclass) = class.superclass() {
            self.initialize(superclass);
        }
        log::trace!("running class initializer of '{}'", class.name());
        class.mark_initialized();
    }

    fn alloc_class(&self, class: ClassObject<'g>) -> ClassId<'g> {
        RefId(&*self.arenas.class_arena.alloc(class))
    }

    fn load_class(&'g self, name: &str) -> Result<ClassId<'g>, ClassNotFound> {
        let key = object_descriptor(name);
        if let Some(class) = self.loaded.get(&key) {
            return Ok(RefId(class));
        }

        // Taking the declaration out up front keeps a (broken) cyclic hierarchy from recursing
        let declaration = self
            .declarations
            .borrow_mut()
            .remove(name)
            .ok_or_else(|| ClassNotFound::new(&key))?;

        let superclass = match &declaration.superclass {
            Some(superclass_name) => Some(self.load_class(superclass_name)?),
            None => None,
        };
        let interfaces = declaration
            .interfaces
            .iter()
            .map(|interface_name| self.load_class(interface_name))
            .collect::<Result<Vec<_>, _>>()?;

        let is_interface = declaration
            .access_flags
            .contains(ClassAccessFlags::INTERFACE);
        let interface_id = if is_interface {
            let id = self.next_interface_id.get();
            self.next_interface_id.set(id + 1);
            Some(id)
        } else {
            None
        };

        // Instance layout: continue from the superclass, aligning each field to its size. The
        // header (one pointer: the class object) is accounted for by the rootmost class.
        let mut instance_size = superclass
            .map(|superclass| superclass.instance_size())
            .unwrap_or(self.layout.pointer_size);
        let mut static_count = 0;
        let mut field_locations = Vec::with_capacity(declaration.fields.len());
        for field in &declaration.fields {
            if field.access_flags.contains(FieldAccessFlags::STATIC) {
                field_locations.push(FieldLocation::Static { slot: static_count });
                static_count += 1;
            } else {
                let size = field_size(&field.descriptor, &self.layout);
                let offset = round_up(instance_size, size);
                field_locations.push(FieldLocation::Instance { offset });
                instance_size = offset + size;
            }
        }

        // Dispatch-table slots: classes inherit the superclass v-table slot for slot, overrides
        // replace in place, new virtual methods append. Interface methods are numbered within
        // their interface instead.
        let inherited: Vec<(String, String)> = match superclass {
            Some(superclass) if !is_interface => superclass
                .0
                .table
                .iter()
                .map(|method| (method.name.clone(), method.descriptor.clone()))
                .collect(),
            _ => vec![],
        };
        let mut table_len = inherited.len();
        let mut method_slots = Vec::with_capacity(declaration.methods.len());
        for method in &declaration.methods {
            let no_slot = method.access_flags.contains(MethodAccessFlags::STATIC)
                || method.access_flags.contains(MethodAccessFlags::PRIVATE)
                || method.name.starts_with('<');
            let slot = if no_slot {
                None
            } else if let Some(overridden) = inherited
                .iter()
                .position(|(name, descriptor)| {
                    *name == method.name && *descriptor == method.descriptor
                })
            {
                Some(overridden)
            } else {
                let slot = table_len;
                table_len += 1;
                Some(slot)
            };
            method_slots.push(slot);
        }

        let class = self.alloc_class(ClassObject {
            init_state: AtomicU8::new(CLASS_UNINITIALIZED),
            vtable_ptr: AtomicUsize::new(0),
            name: declaration.name.clone(),
            superclass,
            interfaces,
            access_flags: declaration.access_flags,
            component_type: None,
            interface_id,
            instance_size,
            primitive: false,
            methods: Default::default(),
            fields: Default::default(),
            table: Default::default(),
            vtable_code: zeroed_cells(table_len),
            statics: zeroed_cells(static_count),
        });
        class
            .0
            .vtable_ptr
            .store(class.0.vtable_code.as_ptr() as usize, Ordering::Relaxed);

        for (field, location) in declaration.fields.iter().zip(field_locations) {
            let field = RefId(&*self.arenas.field_arena.alloc(FieldInfo {
                class,
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
                access_flags: field.access_flags,
                location,
            }));
            class.0.fields.push(field);
        }

        // The table starts as the inherited slots; declared methods override in place or extend
        let mut table: Vec<Option<MethodId<'g>>> = (0..table_len)
            .map(|slot| {
                superclass
                    .filter(|_| !is_interface)
                    .and_then(|superclass| superclass.table_entry(slot))
            })
            .collect();
        for (method, slot) in declaration.methods.iter().zip(method_slots) {
            let method = RefId(&*self.arenas.method_arena.alloc(MethodInfo {
                class,
                name: method.name.clone(),
                descriptor: method.descriptor.clone(),
                access_flags: method.access_flags,
                table_slot: slot,
            }));
            class.0.methods.push(method);
            if let Some(slot) = slot {
                table[slot] = Some(method);
            }
        }
        for entry in table {
            // Every slot is either inherited or filled by a declared method
            class.0.table.push(entry.unwrap());
        }

        log::trace!("loaded class '{}'", class.name());
        self.loaded.insert(key, class);
        Ok(class)
    }

    fn load_array(&'g self, descriptor: &str) -> Result<ClassId<'g>, ClassNotFound> {
        let component = self.for_name(&descriptor[1..])?;
        // Arrays subclass java/lang/Object when the loader knows it
        let superclass = self.for_name_loaded("Ljava/lang/Object;");
        let class = self.alloc_class(ClassObject {
            init_state: AtomicU8::new(CLASS_UNINITIALIZED),
            vtable_ptr: AtomicUsize::new(0),
            name: descriptor.to_owned(),
            superclass,
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL,
            component_type: Some(component),
            interface_id: None,
            instance_size: self.layout.pointer_size + 4,
            primitive: false,
            methods: Default::default(),
            fields: Default::default(),
            table: Default::default(),
            vtable_code: Box::new([]),
            statics: Box::new([]),
        });
        // Arrays have no initializer of their own
        class.mark_initialized();
        log::trace!("created array class '{}'", class.name());
        self.loaded.insert(descriptor.to_owned(), class);
        Ok(class)
    }
}

/// Wrap a class name into the corresponding object field descriptor
pub fn object_descriptor(class_name: &str) -> String {
    debug_assert!(
        !class_name.ends_with(';'),
        "expected a class name, got a descriptor: {:?}",
        class_name,
    );
    format!("L{};", class_name)
}

fn zeroed_cells(count: usize) -> Box<[AtomicU64]> {
    (0..count).map(|_| AtomicU64::new(0)).collect()
}

fn round_up(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) / alignment * alignment
}

/// Size (and alignment) in bytes of a field with the given descriptor
fn field_size(descriptor: &str, layout: &TargetLayout) -> usize {
    match descriptor.as_bytes().first() {
        Some(b'Z') | Some(b'B') => 1,
        Some(b'C') | Some(b'S') => 2,
        Some(b'I') | Some(b'F') => 4,
        Some(b'J') | Some(b'D') => 8,
        _ => layout.pointer_size,
    }
}
