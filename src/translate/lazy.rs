//! Lazy class loading during code generation
//!
//! The translator constantly needs facts that only exist once a class is loaded: the v-table
//! slot of a method, the byte offset of a field, the address of a class object. Loading classes
//! eagerly at compile time would defeat lazy semantics (a program that never reaches a broken
//! reference must never observe its brokenness), so [`LazyClassLoaderHelper`] goes one of two
//! ways for every request:
//!
//!   - the class is already loaded: emit the answer directly into the IR, producing the best
//!     possible code;
//!   - it is not: emit a call to a mangled stub symbol whose definition, materialized on first
//!     execution, loads the class, computes the answer, and stands in for it from then on.
//!
//! Either way IR emission itself never fails. User-program errors (missing classes, missing
//! members, abstract targets) are baked into materialized definitions that trap with the
//! JVM-mandated exception when - and only when - they are actually reached.

use super::mangling::{
    demangle_stub_symbol_name, mangle_class_object_access, mangle_field_access,
    mangle_member_symbol, mangle_method_resolution_call, mangle_static_call, DemangledStubSymbol,
    MethodResolution,
};
use crate::ir::{Function, FunctionBuilder, IrType, Signature, TargetLayout, Value};
use crate::jvm::{parse_field_type, FieldType, MethodType, RenderDescriptor};
use crate::runtime::{
    object_descriptor, ClassId, ClassLoader, FieldLocation, MethodId, CLASS_INITIALIZED,
    CLASS_VTABLE_PTR_OFFSET, VM_INITIALIZE_CLASS, VM_ITABLE_LOOKUP,
    VM_THROW_ABSTRACT_METHOD_ERROR, VM_THROW_NO_CLASS_DEF_FOUND_ERROR,
    VM_THROW_NO_SUCH_FIELD_ERROR, VM_THROW_NO_SUCH_METHOD_ERROR,
};

/// How the target of a [`do_indirect_call`](LazyClassLoaderHelper::do_indirect_call) is resolved
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IndirectResolution {
    /// 5.4.3.3. Method Resolution from the JVM Spec.
    Virtual,
    /// 5.4.3.4. Interface Method Resolution from the JVM Spec.
    Interface,
}

/// Outcome of resolving a virtual or interface dispatch
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ResolutionResult {
    /// The target occupies a known slot in the receiver class's v-table
    VTableOffset { slot: usize },

    /// The target is located through the receiver's interface dispatch table
    ITableOffset { interface_id: usize, slot: usize },

    /// Resolution found an abstract or missing method; calling the site must raise
    /// `AbstractMethodError` with this diagnostic
    Abstract(String),
}

/// Helper to fetch properties about a class while still doing lazy class loading
///
/// Emission goes through a caller-supplied [`FunctionBuilder`]; the stub side is wired up by
/// handing [`materialize_stub`](LazyClassLoaderHelper::materialize_stub) to the
/// [`StubRegistry`](crate::runtime::StubRegistry) as its materialization callback.
pub struct LazyClassLoaderHelper<'g> {
    class_loader: &'g ClassLoader<'g>,
    layout: TargetLayout,
}

impl<'g> LazyClassLoaderHelper<'g> {
    pub fn new(class_loader: &'g ClassLoader<'g>, layout: TargetLayout) -> Self {
        LazyClassLoaderHelper {
            class_loader,
            layout,
        }
    }

    /// Creates a non-virtual call to the possibly static method `method_name` of type
    /// `method_type` within `class_name` using `args`. This is used to implement `invokestatic`
    /// and `invokespecial`.
    ///
    /// Returns the call result, or `None` for a void method.
    pub fn do_non_virtual_call(
        &self,
        builder: &mut FunctionBuilder,
        is_static: bool,
        class_name: &str,
        method_name: &str,
        method_type: &MethodType,
        args: &[Value],
    ) -> Option<Value> {
        let signature = Signature::of_method_type(method_type, !is_static);
        if let Some(class) = self.class_loader.for_name_loaded(&object_descriptor(class_name)) {
            let descriptor = method_type.render();
            // Constructors bind to the named class; everything else may fall through to a
            // superclass declaration
            let resolved = if method_name.starts_with('<') {
                class.method(method_name, &descriptor)
            } else {
                class.method_in_hierarchy(method_name, &descriptor)
            };
            if let Some(method) =
                resolved.filter(|method| method.is_static() == is_static && !method.is_abstract())
            {
                if is_static {
                    let class_object = builder.ptr_const(method.class.address());
                    self.emit_class_initializer_gate(builder, class_object);
                }
                return builder.call_symbol(method.direct_call_symbol(), signature, args.to_vec());
            }
            // Broken reference: leave it to the stub, whose materialization traps when called
        }
        builder.call_symbol(
            mangle_static_call(class_name, method_name, method_type),
            signature,
            args.to_vec(),
        )
    }

    /// Creates a call to the method `method_name` of type `method_type` within `class_name`,
    /// dispatching on the receiver `args[0]`. `resolution` determines how the actual method to
    /// be called is resolved.
    pub fn do_indirect_call(
        &self,
        builder: &mut FunctionBuilder,
        class_name: &str,
        method_name: &str,
        method_type: &MethodType,
        args: &[Value],
        resolution: IndirectResolution,
    ) -> Option<Value> {
        let signature = Signature::of_method_type(method_type, true);
        if let Some(class) = self.class_loader.for_name_loaded(&object_descriptor(class_name)) {
            let descriptor = method_type.render();
            let result = match resolution {
                IndirectResolution::Virtual => {
                    Self::virtual_method_resolution(class, method_name, &descriptor)
                }
                IndirectResolution::Interface => {
                    Self::interface_method_resolution(class, method_name, &descriptor)
                }
            };
            return self.emit_resolved_call(builder, &result, &signature, args);
        }
        let mangled = mangle_method_resolution_call(
            match resolution {
                IndirectResolution::Virtual => MethodResolution::Virtual,
                IndirectResolution::Interface => MethodResolution::Interface,
            },
            class_name,
            method_name,
            method_type,
        );
        builder.call_symbol(mangled, signature, args.to_vec())
    }

    /// Returns an IR value holding the byte offset of `field_name` with type `field_type` within
    /// an instance of `class_name`, as a pointer-width integer.
    pub fn get_instance_field_offset(
        &self,
        builder: &mut FunctionBuilder,
        class_name: &str,
        field_name: &str,
        field_type: &FieldType,
    ) -> Value {
        if let Some(class) = self.class_loader.for_name_loaded(&object_descriptor(class_name)) {
            if let Some(field) = class.field_in_hierarchy(field_name, &field_type.render()) {
                if let FieldLocation::Instance { offset } = field.location {
                    return builder.iconst(self.layout.pointer_sized_int(), offset as i64);
                }
            }
        }
        let signature = Signature::new(vec![], Some(self.layout.pointer_sized_int()));
        self.expect_value(builder.call_symbol(
            mangle_field_access(class_name, field_name, field_type),
            signature,
            vec![],
        ))
    }

    /// Returns an IR pointer to the storage of the static field `field_name` with type
    /// `field_type` within `class_name`.
    ///
    /// The mangled symbol is shared with [`get_instance_field_offset`]
    /// (LazyClassLoaderHelper::get_instance_field_offset); the signature used here selects the
    /// static interpretation, and materialization checks which one the loaded field supports.
    pub fn get_static_field_address(
        &self,
        builder: &mut FunctionBuilder,
        class_name: &str,
        field_name: &str,
        field_type: &FieldType,
    ) -> Value {
        if let Some(class) = self.class_loader.for_name_loaded(&object_descriptor(class_name)) {
            if let Some(field) = class.field_in_hierarchy(field_name, &field_type.render()) {
                if let FieldLocation::Static { slot } = field.location {
                    let class_object = builder.ptr_const(field.class.address());
                    self.emit_class_initializer_gate(builder, class_object);
                    return builder.ptr_const(field.class.static_field_address(slot));
                }
            }
        }
        let signature = Signature::new(vec![], Some(IrType::Ptr));
        self.expect_value(builder.call_symbol(
            mangle_field_access(class_name, field_name, field_type),
            signature,
            vec![],
        ))
    }

    /// Returns an IR pointer to the class object of the type with the given field descriptor.
    ///
    /// With `must_initialize_class_object`, the emitted code additionally ensures the class
    /// initializer has run before the pointer is used - even on the fast path, since a class can
    /// be loaded long before it is initialized.
    pub fn get_class_object(
        &self,
        builder: &mut FunctionBuilder,
        field_descriptor: &str,
        must_initialize_class_object: bool,
    ) -> Value {
        let class_object = if let Some(class) = self.class_loader.for_name_loaded(field_descriptor)
        {
            builder.ptr_const(class.address())
        } else {
            let descriptor = parse_field_type(field_descriptor);
            let signature = Signature::new(vec![], Some(IrType::Ptr));
            self.expect_value(builder.call_symbol(
                mangle_class_object_access(&descriptor),
                signature,
                vec![],
            ))
        };
        if must_initialize_class_object {
            self.emit_class_initializer_gate(builder, class_object);
        }
        class_object
    }

    /// Materialization callback for the stub symbols this helper emits calls to
    ///
    /// Demangles the symbol, loads (and where the operation demands it, initializes) the owning
    /// class, and produces the tiny definition that performs the computed operation. Returns
    /// `None` for symbols that are not stub symbols, leaving them to other resolvers.
    pub fn materialize_stub(&self, symbol_name: &str) -> Option<Function> {
        let function = match demangle_stub_symbol_name(symbol_name)? {
            DemangledStubSymbol::ClassObjectLoad(descriptor) => {
                self.materialize_class_object_load(symbol_name, &descriptor)
            }
            DemangledStubSymbol::FieldAccess {
                class_name,
                field_name,
                descriptor,
            } => self.materialize_field_access(symbol_name, class_name, field_name, &descriptor),
            DemangledStubSymbol::StaticCall {
                class_name,
                method_name,
                descriptor,
            } => self.materialize_non_virtual_call(
                symbol_name,
                class_name,
                method_name,
                &descriptor,
                false,
            ),
            DemangledStubSymbol::MethodResolutionCall {
                resolution: MethodResolution::Special,
                class_name,
                method_name,
                descriptor,
            } => self.materialize_non_virtual_call(
                symbol_name,
                class_name,
                method_name,
                &descriptor,
                true,
            ),
            DemangledStubSymbol::MethodResolutionCall {
                resolution,
                class_name,
                method_name,
                descriptor,
            } => {
                let indirect = match resolution {
                    MethodResolution::Virtual => IndirectResolution::Virtual,
                    _ => IndirectResolution::Interface,
                };
                self.materialize_resolution_call(
                    symbol_name,
                    indirect,
                    class_name,
                    method_name,
                    &descriptor,
                )
            }
        };
        Some(function)
    }

    fn materialize_class_object_load(&self, symbol_name: &str, descriptor: &FieldType) -> Function {
        let signature = Signature::new(vec![], Some(IrType::Ptr));
        match self.class_loader.for_name(&descriptor.render()) {
            Ok(class) => {
                let mut builder = FunctionBuilder::new(symbol_name, signature);
                let class_object = builder.ptr_const(class.address());
                builder.ret(Some(class_object));
                builder.finish()
            }
            Err(not_found) => self.throwing_function(
                symbol_name,
                signature,
                VM_THROW_NO_CLASS_DEF_FOUND_ERROR,
                &not_found.descriptor,
            ),
        }
    }

    fn materialize_field_access(
        &self,
        symbol_name: &str,
        class_name: &str,
        field_name: &str,
        descriptor: &FieldType,
    ) -> Function {
        let class = match self.class_loader.for_name(&object_descriptor(class_name)) {
            Ok(class) => class,
            Err(not_found) => {
                return self.throwing_function(
                    symbol_name,
                    Signature::new(vec![], Some(IrType::Ptr)),
                    VM_THROW_NO_CLASS_DEF_FOUND_ERROR,
                    &not_found.descriptor,
                )
            }
        };
        match class.field_in_hierarchy(field_name, &descriptor.render()) {
            Some(field) => match field.location {
                FieldLocation::Static { slot } => {
                    // A static access is the first observation of the class's static state
                    self.class_loader.initialize(field.class);
                    let signature = Signature::new(vec![], Some(IrType::Ptr));
                    let mut builder = FunctionBuilder::new(symbol_name, signature);
                    let address = builder.ptr_const(field.class.static_field_address(slot));
                    builder.ret(Some(address));
                    builder.finish()
                }
                FieldLocation::Instance { offset } => {
                    let signature =
                        Signature::new(vec![], Some(self.layout.pointer_sized_int()));
                    let mut builder = FunctionBuilder::new(symbol_name, signature);
                    let offset = builder.iconst(self.layout.pointer_sized_int(), offset as i64);
                    builder.ret(Some(offset));
                    builder.finish()
                }
            },
            None => self.throwing_function(
                symbol_name,
                Signature::new(vec![], Some(IrType::Ptr)),
                VM_THROW_NO_SUCH_FIELD_ERROR,
                &mangle_member_symbol(class_name, field_name, &descriptor.render()),
            ),
        }
    }

    fn materialize_non_virtual_call(
        &self,
        symbol_name: &str,
        class_name: &str,
        method_name: &str,
        method_type: &MethodType,
        has_this: bool,
    ) -> Function {
        // `has_this` is only a fallback for unresolvable references; a resolved method knows
        // whether it is static
        let fallback_signature = Signature::of_method_type(method_type, has_this);
        let class = match self.class_loader.for_name(&object_descriptor(class_name)) {
            Ok(class) => class,
            Err(not_found) => {
                return self.throwing_function(
                    symbol_name,
                    fallback_signature,
                    VM_THROW_NO_CLASS_DEF_FOUND_ERROR,
                    &not_found.descriptor,
                )
            }
        };
        let descriptor = method_type.render();
        let resolved = if method_name.starts_with('<') {
            class.method(method_name, &descriptor)
        } else {
            class.method_in_hierarchy(method_name, &descriptor)
        };
        match resolved {
            None => self.throwing_function(
                symbol_name,
                fallback_signature,
                VM_THROW_NO_SUCH_METHOD_ERROR,
                &mangle_member_symbol(class_name, method_name, &descriptor),
            ),
            Some(method) if method.is_abstract() => self.throwing_function(
                symbol_name,
                Signature::of_method_type(method_type, true),
                VM_THROW_ABSTRACT_METHOD_ERROR,
                &mangle_member_symbol(method.class.name(), method_name, &descriptor),
            ),
            Some(method) => {
                if method.is_static() {
                    self.class_loader.initialize(method.class);
                }
                let signature = Signature::of_method_type(method_type, !method.is_static());
                let mut builder = FunctionBuilder::new(symbol_name, signature.clone());
                let args = builder.parameters();
                let result =
                    builder.call_symbol(method.direct_call_symbol(), signature, args);
                builder.ret(result);
                builder.finish()
            }
        }
    }

    fn materialize_resolution_call(
        &self,
        symbol_name: &str,
        resolution: IndirectResolution,
        class_name: &str,
        method_name: &str,
        method_type: &MethodType,
    ) -> Function {
        let signature = Signature::of_method_type(method_type, true);
        let class = match self.class_loader.for_name(&object_descriptor(class_name)) {
            Ok(class) => class,
            Err(not_found) => {
                return self.throwing_function(
                    symbol_name,
                    signature,
                    VM_THROW_NO_CLASS_DEF_FOUND_ERROR,
                    &not_found.descriptor,
                )
            }
        };
        let descriptor = method_type.render();
        let result = match resolution {
            IndirectResolution::Virtual => {
                Self::virtual_method_resolution(class, method_name, &descriptor)
            }
            IndirectResolution::Interface => {
                Self::interface_method_resolution(class, method_name, &descriptor)
            }
        };
        match result {
            ResolutionResult::Abstract(message) => self.throwing_function(
                symbol_name,
                signature,
                VM_THROW_ABSTRACT_METHOD_ERROR,
                &message,
            ),
            result => {
                let mut builder = FunctionBuilder::new(symbol_name, signature.clone());
                let args = builder.parameters();
                let call = self.emit_resolved_call(&mut builder, &result, &signature, &args);
                builder.ret(call);
                builder.finish()
            }
        }
    }

    /// Emit the dispatch sequence for an already resolved indirect call
    fn emit_resolved_call(
        &self,
        builder: &mut FunctionBuilder,
        result: &ResolutionResult,
        signature: &Signature,
        args: &[Value],
    ) -> Option<Value> {
        let pointer_int = self.layout.pointer_sized_int();
        match result {
            ResolutionResult::VTableOffset { slot } => {
                let receiver = args[0];
                // The class object sits in the object header (OBJECT_CLASS_OFFSET is 0)
                let class_object = builder.load(IrType::Ptr, receiver);
                let vtable_ptr_offset =
                    builder.iconst(pointer_int, CLASS_VTABLE_PTR_OFFSET as i64);
                let vtable_ptr = builder.ptr_add(class_object, vtable_ptr_offset);
                let vtable = builder.load(IrType::Ptr, vtable_ptr);
                let slot_offset =
                    builder.iconst(pointer_int, (slot * self.layout.pointer_size) as i64);
                let entry = builder.ptr_add(vtable, slot_offset);
                let target = builder.load(IrType::Ptr, entry);
                builder.call_indirect(target, signature.clone(), args.to_vec())
            }
            ResolutionResult::ITableOffset { interface_id, slot } => {
                let receiver = args[0];
                let class_object = builder.load(IrType::Ptr, receiver);
                let interface_id = builder.iconst(pointer_int, *interface_id as i64);
                let lookup_signature =
                    Signature::new(vec![IrType::Ptr, pointer_int], Some(IrType::Ptr));
                let table = self.expect_value(builder.call_symbol(
                    VM_ITABLE_LOOKUP,
                    lookup_signature,
                    vec![class_object, interface_id],
                ));
                let slot_offset =
                    builder.iconst(pointer_int, (slot * self.layout.pointer_size) as i64);
                let entry = builder.ptr_add(table, slot_offset);
                let target = builder.load(IrType::Ptr, entry);
                builder.call_indirect(target, signature.clone(), args.to_vec())
            }
            ResolutionResult::Abstract(message) => {
                // Inline trap: the call site is reachable code, so the block must go on
                log::error!("abstract target at call site: {}", message);
                let message = builder.str_const(message.as_str());
                builder.call_symbol(
                    VM_THROW_ABSTRACT_METHOD_ERROR,
                    Signature::new(vec![IrType::Ptr], None),
                    vec![message],
                );
                signature.return_type.map(|ty| builder.undef(ty))
            }
        }
    }

    /// Emit the class-initializer gate: compare the class object's initialization state against
    /// the initialized sentinel and call into the VM on a miss. Emitted per use site; runs of
    /// the slow path are idempotent.
    fn emit_class_initializer_gate(&self, builder: &mut FunctionBuilder, class_object: Value) {
        // The state byte is the first field of the class object (CLASS_INIT_STATE_OFFSET is 0)
        let state = builder.load(IrType::I8, class_object);
        let initialized = builder.iconst(IrType::I8, CLASS_INITIALIZED as i64);
        let is_initialized = builder.icmp_eq(state, initialized);
        let done = builder.create_block();
        let slow = builder.create_block();
        builder.cond_branch(is_initialized, done, slow);
        builder.switch_to_block(slow);
        builder.call_symbol(
            VM_INITIALIZE_CLASS,
            Signature::new(vec![IrType::Ptr], None),
            vec![class_object],
        );
        builder.branch(done);
        builder.switch_to_block(done);
    }

    /// A definition that raises the given error with a diagnostic instead of performing the
    /// requested operation
    fn throwing_function(
        &self,
        symbol_name: &str,
        signature: Signature,
        trap_symbol: &str,
        message: &str,
    ) -> Function {
        log::error!("'{}' materialized as a trap: {}", symbol_name, message);
        let mut builder = FunctionBuilder::new(symbol_name, signature);
        let message = builder.str_const(message);
        builder.call_symbol(
            trap_symbol,
            Signature::new(vec![IrType::Ptr], None),
            vec![message],
        );
        builder.unreachable();
        builder.finish()
    }

    fn expect_value(&self, value: Option<Value>) -> Value {
        // Calls built with a non-void signature always produce a value
        match value {
            Some(value) => value,
            None => unreachable!("void call used as a value"),
        }
    }

    /// Method resolution per section 5.4.3.3 of the JVM specification: the class and its
    /// superclasses first, then a maximally-specific superinterface method.
    fn virtual_method_resolution(
        class: ClassId<'g>,
        method_name: &str,
        descriptor: &str,
    ) -> ResolutionResult {
        let mut next = Some(class);
        while let Some(current) = next {
            if let Some(method) = current.method(method_name, descriptor) {
                if let Some(result) = Self::vtable_result(method) {
                    return result;
                }
            }
            next = current.superclass();
        }
        Self::maximally_specific_interface_method(class, method_name, descriptor, false)
    }

    /// Interface method resolution per section 5.4.3.4 of the JVM specification
    fn interface_method_resolution(
        interface: ClassId<'g>,
        method_name: &str,
        descriptor: &str,
    ) -> ResolutionResult {
        debug_assert!(
            interface.is_interface(),
            "interface resolution against non-interface '{}'",
            interface.name(),
        );
        // A public non-static method of java/lang/Object resolves like a class method and
        // dispatches through the v-table
        let mut next = interface.superclass();
        while let Some(current) = next {
            if let Some(method) = current.method(method_name, descriptor) {
                if let Some(result) = Self::vtable_result(method) {
                    return result;
                }
            }
            next = current.superclass();
        }
        if let Some(method) = interface.method(method_name, descriptor) {
            if !method.is_static() && !method.is_private() {
                return Self::itable_result(method);
            }
        }
        Self::maximally_specific_interface_method(interface, method_name, descriptor, true)
    }

    fn vtable_result(method: MethodId<'g>) -> Option<ResolutionResult> {
        // Static, private, and initializer methods never take part in dispatch; resolution
        // keeps looking past them
        if method.is_static() || method.is_private() || method.is_initializer() {
            return None;
        }
        if method.is_abstract() {
            return Some(ResolutionResult::Abstract(mangle_member_symbol(
                method.class.name(),
                &method.name,
                &method.descriptor,
            )));
        }
        method
            .table_slot
            .map(|slot| ResolutionResult::VTableOffset { slot })
    }

    fn itable_result(method: MethodId<'g>) -> ResolutionResult {
        match (method.class.interface_id(), method.table_slot) {
            (Some(interface_id), Some(slot)) => {
                ResolutionResult::ITableOffset { interface_id, slot }
            }
            _ => ResolutionResult::Abstract(mangle_member_symbol(
                method.class.name(),
                &method.name,
                &method.descriptor,
            )),
        }
    }

    /// Search the superinterfaces of `class` for a maximally-specific method with the given name
    /// and descriptor. A non-abstract maximally-specific method always wins; an abstract one
    /// resolves only where the dispatch itself supplies the implementation
    /// (`abstract_resolves`, ie. interface resolution).
    fn maximally_specific_interface_method(
        class: ClassId<'g>,
        method_name: &str,
        descriptor: &str,
        abstract_resolves: bool,
    ) -> ResolutionResult {
        let mut candidates: Vec<MethodId<'g>> = vec![];
        for interface in class.superinterfaces() {
            if let Some(method) = interface.method(method_name, descriptor) {
                if !method.is_static() && !method.is_private() {
                    candidates.push(method);
                }
            }
        }
        let maximally_specific: Vec<MethodId<'g>> = candidates
            .iter()
            .copied()
            .filter(|candidate| {
                !candidates.iter().any(|other| {
                    other.class != candidate.class
                        && Self::is_subinterface(other.class, candidate.class)
                })
            })
            .collect();

        if let Some(method) = maximally_specific
            .iter()
            .copied()
            .find(|method| !method.is_abstract())
        {
            return Self::itable_result(method);
        }
        if abstract_resolves {
            if let Some(method) = maximally_specific.first().copied() {
                return Self::itable_result(method);
            }
        }
        ResolutionResult::Abstract(mangle_member_symbol(class.name(), method_name, descriptor))
    }

    /// Is `sub` a (strict) subinterface of `sup`?
    fn is_subinterface(sub: ClassId<'g>, sup: ClassId<'g>) -> bool {
        sub != sup && sub.superinterfaces().contains(&sup)
    }
}
