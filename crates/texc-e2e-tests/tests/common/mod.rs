use std::sync::Arc;

use texc::{
    BackendKind, BufferArg, CodeGen, CodegenOptions, Ir, Statement, compiler_available,
    create_codegen,
};

/// Installs the test logger once per binary; `RUST_LOG` controls the level.
#[allow(dead_code)]
pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Options for the native JIT, or `None` when no C compiler is installed.
#[allow(dead_code)]
pub fn native_options() -> Option<CodegenOptions> {
    let opts = CodegenOptions::from_env();
    if compiler_available(&opts) {
        Some(opts)
    } else {
        log::warn!("no C compiler at `{}`, skipping native JIT checks", opts.compiler_path().display());
        None
    }
}

/// Builds the interpreter for `stmt`.
#[allow(dead_code)]
pub fn interpreter(ir: Arc<Ir>, stmt: &Statement, params: Vec<BufferArg>) -> Box<dyn CodeGen> {
    create_codegen(
        BackendKind::SimpleIrEval,
        ir,
        stmt,
        params,
        &CodegenOptions::default(),
    )
    .expect("interpreter construction failed")
}

/// Every host backend available on this machine: the interpreter, plus the
/// native JIT when a C compiler is installed.
#[allow(dead_code)]
pub fn host_backends(ir: Arc<Ir>, stmt: &Statement, params: Vec<BufferArg>) -> Vec<Box<dyn CodeGen>> {
    let mut backends = vec![interpreter(ir.clone(), stmt, params.clone())];
    if let Some(opts) = native_options() {
        backends.push(
            create_codegen(BackendKind::NativeJit, ir, stmt, params, &opts)
                .expect("native JIT construction failed"),
        );
    }
    backends
}

/// Removes all whitespace, for comparing printed IR.
#[allow(dead_code)]
pub fn squish(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Element-wise comparison with a tolerance relative to the expected
/// magnitude. NaN matches NaN.
#[allow(dead_code)]
pub fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        if e.is_nan() {
            assert!(a.is_nan(), "element {i}: expected NaN, got {a}");
            continue;
        }
        let bound = tolerance * e.abs().max(1.0);
        assert!((a - e).abs() <= bound, "element {i}: expected {e}, got {a}");
    }
}
