#![no_main]

use libfuzzer_sys::fuzz_target;
use cilweave::{
    metadata::{
        method::{MethodAttributes, MethodDef},
        reader::MetadataReader,
        token::Token,
    },
    module::{InMemoryModule, ModuleId},
    rewriter::{verify_rewrite, Rewriter},
    tokens::TokenAllocator,
};

fuzz_target!(|data: &[u8]| {
    let token = Token::new(0x0600_0001);
    let def = MethodDef {
        token,
        declaring_type: "Fuzz.Target".into(),
        name: "Run".into(),
        flags: MethodAttributes::STATIC,
        impl_flags: 0,
        declaring_type_is_value: false,
        signature: vec![0x00, 0x01, 0x08, 0x08],
    };
    let module = InMemoryModule::new(ModuleId(1), "Fuzz").with_method(def, data.to_vec());

    let Ok(method) = MetadataReader::new().read_method(&module, token) else {
        return;
    };
    let rewriter = Rewriter::default();
    let Ok(plan) = rewriter.plan(&method, "FuzzTracer", true) else {
        return;
    };

    // anything the planner accepts must emit and verify
    let mut allocator = TokenAllocator::scan(&module).unwrap();
    let allocation = allocator.allocate_all(&module, &plan.requests).unwrap();
    let rewritten = rewriter.emit(&plan, &allocation).unwrap();
    verify_rewrite(&plan, &rewritten).unwrap();
});
