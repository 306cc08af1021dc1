//! End-to-end tests of the lazy code-generation path: IR emission against loaded and unloaded
//! classes, stub materialization through the registry, and the class-initializer gate.

use jvm2native::ir::{
    BranchInstruction, Function, FunctionBuilder, Instruction, IrType, Signature, TargetLayout,
};
use jvm2native::jvm::{
    parse_field_type, parse_method_type, ClassAccessFlags, FieldAccessFlags, MethodAccessFlags,
};
use jvm2native::runtime::{
    ClassDeclaration, ClassLoader, ClassLoaderArenas, FieldDeclaration, MethodDeclaration,
    StubRegistry, VM_INITIALIZE_CLASS, VM_ITABLE_LOOKUP, VM_THROW_ABSTRACT_METHOD_ERROR,
    VM_THROW_NO_CLASS_DEF_FOUND_ERROR, VM_THROW_NO_SUCH_FIELD_ERROR,
};
use jvm2native::translate::{
    demangle_stub_symbol_name, DemangledStubSymbol, IndirectResolution, LazyClassLoaderHelper,
    MethodResolution,
};

fn method(name: &str, descriptor: &str, access_flags: MethodAccessFlags) -> MethodDeclaration {
    MethodDeclaration {
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        access_flags,
    }
}

fn field(name: &str, descriptor: &str, access_flags: FieldAccessFlags) -> FieldDeclaration {
    FieldDeclaration {
        name: name.to_owned(),
        descriptor: descriptor.to_owned(),
        access_flags,
    }
}

fn register_fixture(loader: &ClassLoader) {
    let public = MethodAccessFlags::PUBLIC;
    loader
        .register(ClassDeclaration {
            name: "java/lang/Object".to_owned(),
            superclass: None,
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC,
            fields: vec![],
            methods: vec![
                method("<init>", "()V", public),
                method("toString", "()Ljava/lang/String;", public),
                method("hashCode", "()I", public),
            ],
        })
        .unwrap();
    loader
        .register(ClassDeclaration {
            name: "app/Counter".to_owned(),
            superclass: Some("java/lang/Object".to_owned()),
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC,
            fields: vec![
                field("count", "I", FieldAccessFlags::PRIVATE),
                field(
                    "total",
                    "J",
                    FieldAccessFlags::PRIVATE | FieldAccessFlags::STATIC,
                ),
            ],
            methods: vec![
                method("<init>", "()V", public),
                method("increment", "()I", public),
                method(
                    "reset",
                    "()V",
                    MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
                ),
            ],
        })
        .unwrap();
    loader
        .register(ClassDeclaration {
            name: "app/Task".to_owned(),
            superclass: Some("java/lang/Object".to_owned()),
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE,
            fields: vec![],
            methods: vec![method(
                "run",
                "()V",
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            )],
        })
        .unwrap();
    loader
        .register(ClassDeclaration {
            name: "app/Abstract".to_owned(),
            superclass: Some("java/lang/Object".to_owned()),
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT,
            fields: vec![],
            methods: vec![method(
                "work",
                "()V",
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            )],
        })
        .unwrap();
}

fn receiver_builder() -> FunctionBuilder {
    FunctionBuilder::new("test", Signature::new(vec![IrType::Ptr], None))
}

fn count_calls_to(function: &Function, symbol: &str) -> usize {
    function
        .called_symbols()
        .filter(|called| *called == symbol)
        .count()
}

fn stub_calls(function: &Function) -> Vec<String> {
    function
        .called_symbols()
        .filter(|symbol| demangle_stub_symbol_name(symbol).is_some())
        .map(str::to_owned)
        .collect()
}

fn count_indirect_calls(function: &Function) -> usize {
    function
        .instructions()
        .filter(|insn| matches!(insn, Instruction::CallIndirect { .. }))
        .count()
}

#[test]
fn indirect_call_against_a_loaded_class_dispatches_inline() {
    let _ = env_logger::builder().is_test(true).try_init();
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let counter = loader.for_name("Lapp/Counter;").unwrap();
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = receiver_builder();
    let receiver = builder.parameter(0);
    let result = helper.do_indirect_call(
        &mut builder,
        "app/Counter",
        "increment",
        &parse_method_type("()I"),
        &[receiver],
        IndirectResolution::Virtual,
    );
    builder.ret(None);
    let function = builder.finish();

    // The call dispatches through the v-table: a load of the slot entry, then an indirect call
    assert_eq!(result.map(|v| function.value_type(v)), Some(IrType::I32));
    assert_eq!(count_indirect_calls(&function), 1);
    assert_eq!(stub_calls(&function), Vec::<String>::new());

    let slot = counter.method("increment", "()I").unwrap().table_slot.unwrap();
    let slot_offset = (slot * 8) as i64;
    assert!(
        function.instructions().any(|insn| matches!(
            insn,
            Instruction::IConst { value, .. } if *value == slot_offset
        )),
        "expected a v-table index at slot offset {}",
        slot_offset,
    );
}

#[test]
fn indirect_call_against_an_unloaded_class_goes_through_a_stub() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = receiver_builder();
    let receiver = builder.parameter(0);
    helper.do_indirect_call(
        &mut builder,
        "app/Counter",
        "increment",
        &parse_method_type("()I"),
        &[receiver],
        IndirectResolution::Virtual,
    );
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(count_indirect_calls(&function), 0);
    let stubs = stub_calls(&function);
    assert_eq!(stubs.len(), 1);
    assert_eq!(
        demangle_stub_symbol_name(&stubs[0]),
        Some(DemangledStubSymbol::MethodResolutionCall {
            resolution: MethodResolution::Virtual,
            class_name: "app/Counter",
            method_name: "increment",
            descriptor: parse_method_type("()I"),
        }),
    );
    // Emitting the stub call must not have loaded the class
    assert!(loader.for_name_loaded("Lapp/Counter;").is_none());
}

#[test]
fn interface_dispatch_uses_the_itable_helper() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let task = loader.for_name("Lapp/Task;").unwrap();
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = receiver_builder();
    let receiver = builder.parameter(0);
    helper.do_indirect_call(
        &mut builder,
        "app/Task",
        "run",
        &parse_method_type("()V"),
        &[receiver],
        IndirectResolution::Interface,
    );
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(count_calls_to(&function, VM_ITABLE_LOOKUP), 1);
    assert_eq!(count_indirect_calls(&function), 1);
    let interface_id = task.interface_id().unwrap() as i64;
    assert!(function.instructions().any(|insn| matches!(
        insn,
        Instruction::IConst { value, .. } if *value == interface_id
    )));
}

#[test]
fn static_call_against_a_loaded_class_is_direct_and_gated() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    loader.for_name("Lapp/Counter;").unwrap();
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = FunctionBuilder::new("caller", Signature::new(vec![], None));
    helper.do_non_virtual_call(
        &mut builder,
        true,
        "app/Counter",
        "reset",
        &parse_method_type("()V"),
        &[],
    );
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(count_calls_to(&function, "app/Counter.reset:()V"), 1);
    assert_eq!(stub_calls(&function), Vec::<String>::new());
    // The class-initializer gate: a conditional around a call into the VM
    assert_eq!(count_calls_to(&function, VM_INITIALIZE_CLASS), 1);
    assert!(matches!(
        function.entry_block().branch_end,
        BranchInstruction::CondBranch { .. },
    ));
}

#[test]
fn non_static_direct_calls_are_not_gated() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    loader.for_name("Lapp/Counter;").unwrap();
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = receiver_builder();
    let receiver = builder.parameter(0);
    helper.do_non_virtual_call(
        &mut builder,
        false,
        "app/Counter",
        "<init>",
        &parse_method_type("()V"),
        &[receiver],
    );
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(count_calls_to(&function, "app/Counter.<init>:()V"), 1);
    assert_eq!(count_calls_to(&function, VM_INITIALIZE_CLASS), 0);
}

#[test]
fn static_call_against_an_unloaded_class_goes_through_a_stub() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = FunctionBuilder::new("caller", Signature::new(vec![], None));
    helper.do_non_virtual_call(
        &mut builder,
        true,
        "app/Counter",
        "reset",
        &parse_method_type("()V"),
        &[],
    );
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(
        stub_calls(&function),
        vec!["Static Call to app/Counter.reset:()V".to_owned()],
    );
    assert_eq!(count_calls_to(&function, VM_INITIALIZE_CLASS), 0);
}

#[test]
fn materializing_a_static_call_initializes_and_forwards() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let definition = helper
        .materialize_stub("Static Call to app/Counter.reset:()V")
        .unwrap();

    // Materialization loaded the class, ran its initializer, and produced a forwarder
    let counter = loader.for_name_loaded("Lapp/Counter;").unwrap();
    assert!(counter.is_initialized());
    assert_eq!(count_calls_to(&definition, "app/Counter.reset:()V"), 1);
    assert_eq!(definition.signature, Signature::new(vec![], None));
}

#[test]
fn materializing_a_virtual_call_produces_a_dispatching_definition() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let definition = helper
        .materialize_stub("Virtual Call to app/Counter.increment:()I")
        .unwrap();

    assert_eq!(
        definition.signature,
        Signature::new(vec![IrType::Ptr], Some(IrType::I32)),
    );
    assert_eq!(count_indirect_calls(&definition), 1);
    // A dispatching stub must not bake in another stub call
    assert_eq!(stub_calls(&definition), Vec::<String>::new());
}

#[test]
fn materializing_an_abstract_target_produces_a_throwing_definition() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let definition = helper
        .materialize_stub("Virtual Call to app/Abstract.work:()V")
        .unwrap();

    assert_eq!(count_calls_to(&definition, VM_THROW_ABSTRACT_METHOD_ERROR), 1);
    assert!(definition.instructions().any(|insn| matches!(
        insn,
        Instruction::StrConst { value } if value == "app/Abstract.work:()V"
    )));
    assert!(matches!(
        definition.blocks().last().map(|block| &block.branch_end),
        Some(BranchInstruction::Unreachable),
    ));
}

#[test]
fn materializing_against_a_missing_class_produces_a_throwing_definition() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let definition = helper
        .materialize_stub("Virtual Call to ghost/Missing.spook:()V")
        .unwrap();
    assert_eq!(
        count_calls_to(&definition, VM_THROW_NO_CLASS_DEF_FOUND_ERROR),
        1,
    );
}

#[test]
fn unrelated_symbols_are_left_to_other_resolvers() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    assert!(helper.materialize_stub("memcpy").is_none());
    // Direct calls are terminal: nothing to materialize
    assert!(helper
        .materialize_stub("app/Counter.increment:()I")
        .is_none());
}

#[test]
fn field_offsets_fold_to_constants_once_loaded() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    loader.for_name("Lapp/Counter;").unwrap();
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = receiver_builder();
    let offset = helper.get_instance_field_offset(
        &mut builder,
        "app/Counter",
        "count",
        &parse_field_type("I"),
    );
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(
        function.defining_instruction(offset),
        Some(&Instruction::IConst {
            ty: IrType::I64,
            value: 8,
        }),
    );
}

#[test]
fn field_offsets_go_through_a_stub_until_loaded() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = receiver_builder();
    let offset = helper.get_instance_field_offset(
        &mut builder,
        "app/Counter",
        "count",
        &parse_field_type("I"),
    );
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(function.value_type(offset), IrType::I64);
    assert_eq!(stub_calls(&function), vec!["app/Counter.count:I".to_owned()]);
}

#[test]
fn static_field_addresses_are_constants_with_a_gate() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let counter = loader.for_name("Lapp/Counter;").unwrap();
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = FunctionBuilder::new("caller", Signature::new(vec![], None));
    let address = helper.get_static_field_address(
        &mut builder,
        "app/Counter",
        "total",
        &parse_field_type("J"),
    );
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(
        function.defining_instruction(address),
        Some(&Instruction::PtrConst {
            address: counter.static_field_address(0),
        }),
    );
    assert_eq!(count_calls_to(&function, VM_INITIALIZE_CLASS), 1);
}

#[test]
fn materializing_field_access_distinguishes_static_from_instance() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    // Instance field: a pointer-width integer constant, no initialization
    let instance = helper.materialize_stub("app/Counter.count:I").unwrap();
    assert_eq!(instance.signature, Signature::new(vec![], Some(IrType::I64)));
    let counter = loader.for_name_loaded("Lapp/Counter;").unwrap();
    assert!(!counter.is_initialized());

    // Static field: a pointer constant, and the class is initialized on materialization
    let static_access = helper.materialize_stub("app/Counter.total:J").unwrap();
    assert_eq!(
        static_access.signature,
        Signature::new(vec![], Some(IrType::Ptr)),
    );
    assert!(counter.is_initialized());
    assert!(static_access.instructions().any(|insn| matches!(
        insn,
        Instruction::PtrConst { address } if *address == counter.static_field_address(0)
    )));
}

#[test]
fn materializing_a_missing_field_produces_a_throwing_definition() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let definition = helper.materialize_stub("app/Counter.missing:I").unwrap();
    assert_eq!(count_calls_to(&definition, VM_THROW_NO_SUCH_FIELD_ERROR), 1);
}

#[test]
fn class_objects_fold_to_constants_once_loaded() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let counter = loader.for_name("Lapp/Counter;").unwrap();
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let mut builder = FunctionBuilder::new("caller", Signature::new(vec![], None));
    let class_object = helper.get_class_object(&mut builder, "Lapp/Counter;", false);
    builder.ret(None);
    let function = builder.finish();

    assert_eq!(
        function.defining_instruction(class_object),
        Some(&Instruction::PtrConst {
            address: counter.address(),
        }),
    );
    assert_eq!(count_calls_to(&function, VM_INITIALIZE_CLASS), 0);
}

#[test]
fn class_object_initialization_gate_is_emitted_on_both_paths() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    // Unloaded: a stub call, then the gate against the returned pointer
    let mut builder = FunctionBuilder::new("caller", Signature::new(vec![], None));
    helper.get_class_object(&mut builder, "Lapp/Counter;", true);
    builder.ret(None);
    let function = builder.finish();
    assert_eq!(stub_calls(&function), vec!["Load Lapp/Counter;".to_owned()]);
    assert_eq!(count_calls_to(&function, VM_INITIALIZE_CLASS), 1);

    // Loaded: a constant, and still the gate
    loader.for_name("Lapp/Counter;").unwrap();
    let mut builder = FunctionBuilder::new("caller", Signature::new(vec![], None));
    helper.get_class_object(&mut builder, "Lapp/Counter;", true);
    builder.ret(None);
    let function = builder.finish();
    assert_eq!(stub_calls(&function), Vec::<String>::new());
    assert_eq!(count_calls_to(&function, VM_INITIALIZE_CLASS), 1);
}

#[test]
fn class_object_loads_materialize_for_arrays_and_primitives() {
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    loader.for_name("Ljava/lang/Object;").unwrap();
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());

    let definition = helper.materialize_stub("Load [I").unwrap();
    let array = loader.for_name_loaded("[I").unwrap();
    assert!(definition.instructions().any(|insn| matches!(
        insn,
        Instruction::PtrConst { address } if *address == array.address()
    )));

    let primitive = helper.materialize_stub("Load I").unwrap();
    let int_class = loader.for_name_loaded("I").unwrap();
    assert!(primitive.instructions().any(|insn| matches!(
        insn,
        Instruction::PtrConst { address } if *address == int_class.address()
    )));
}

#[test]
fn the_registry_materializes_helper_stubs_at_most_once() {
    let _ = env_logger::builder().is_test(true).try_init();
    let arenas = ClassLoaderArenas::new();
    let loader = ClassLoader::new(&arenas);
    register_fixture(&loader);
    let helper = LazyClassLoaderHelper::new(&loader, TargetLayout::default());
    let registry = StubRegistry::new(|symbol| helper.materialize_stub(symbol));

    let symbol = "Virtual Call to app/Counter.increment:()I";
    let first = registry.resolve(symbol).unwrap();
    let second = registry.resolve(symbol).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert!(registry.resolve("memcpy").is_none());

    // A compiled method published under the direct symbol preempts later materialization
    let mut builder = FunctionBuilder::new(
        "app/Counter.increment:()I",
        Signature::new(vec![IrType::Ptr], Some(IrType::I32)),
    );
    let result = builder.iconst(IrType::I32, 1);
    builder.ret(Some(result));
    let compiled = registry.define("app/Counter.increment:()I", builder.finish());
    assert!(std::sync::Arc::ptr_eq(
        &compiled,
        &registry.resolve("app/Counter.increment:()I").unwrap(),
    ));
}
