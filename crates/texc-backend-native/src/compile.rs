//! Invoking the system C compiler.

use std::path::Path;
use std::process::Command;

use log::debug;
use texc_backend_core::{CodegenOptions, CodegenError};

pub(crate) fn lib_ext() -> &'static str {
    if cfg!(target_os = "windows") {
        ".dll"
    } else if cfg!(target_os = "macos") {
        ".dylib"
    } else {
        ".so"
    }
}

/// Builds `src` into the shared object `out`.
///
/// `-fwrapv` gives int32 overflow the same wrapping semantics as the
/// interpreter. Fast-math and FMA contraction stay off so float results
/// match the interpreter's operation by operation.
pub(crate) fn compile_c(src: &Path, out: &Path, opts: &CodegenOptions) -> Result<(), CodegenError> {
    let compiler = opts.compiler_path();
    let mut cmd = Command::new(&compiler);
    if cfg!(target_os = "macos") {
        cmd.arg("-dynamiclib");
    } else {
        cmd.arg("-shared").arg("-fPIC");
    }
    cmd.arg(opts.opt_level.flag())
        .args(["-fwrapv", "-ffp-contract=off", "-std=gnu11"]);
    cmd.args(&opts.extra_flags);
    cmd.arg("-o").arg(out).arg(src);
    if !cfg!(target_os = "windows") {
        cmd.arg("-lm");
    }
    debug!("native: {cmd:?}");

    let output = cmd.output().map_err(|err| {
        CodegenError::Compile(format!("failed to run `{}`: {err}", compiler.display()))
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CodegenError::Compile(format!("C compiler failed: {stderr}")));
    }
    Ok(())
}

/// `true` if the configured compiler can be started.
pub fn compiler_available(opts: &CodegenOptions) -> bool {
    Command::new(opts.compiler_path())
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}
