//! C-family source emission shared by the native and CUDA backends.
//!
//! Vector values are scalarized: each lane of a vector expression is
//! emitted as its own scalar C expression, and vector stores become one
//! store per lane. Masked loads and stores turn into guarded single-element
//! accesses.
//!
//! Host C is checked: every access is bounds-checked against the real
//! length of its buffer, and int32 division by zero is caught. The first
//! fault is recorded in a [`FaultStatus`] the kernel receives as its last
//! parameter, after which no further memory is touched and loops exit.
//! CUDA C is emitted unchecked.

use std::collections::HashMap;
use std::fmt::Write as _;

use texc_ir::{
    BinaryOp, Dtype, Expression, Handle, IntrinsicOp, Ir, ScalarKind, Statement, Variable,
};

use crate::{BackendKind, BufferArg, CodegenError, UniqueNameManager};

/// Which flavour of C to write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    /// Host C compiled into a shared object. GPU bindings are ignored and
    /// every loop is emitted.
    C,
    /// CUDA C for NVRTC. Loops bound to `blockIdx`/`threadIdx` become
    /// guarded index bindings.
    Cuda,
}

impl Dialect {
    fn backend(self) -> BackendKind {
        match self {
            Self::C => BackendKind::NativeJit,
            Self::Cuda => BackendKind::Cuda,
        }
    }
}

const C_PRELUDE: &str = "\
#include <limits.h>
#include <math.h>
#include <stdlib.h>

typedef struct { int code; int buffer; long long index; long long len; } texc_status;

static int texc_in_bounds(texc_status* st, int buffer, long long index, long long len) {
    if (st->code) return 0;
    if (index >= 0 && index < len) return 1;
    st->code = 1; st->buffer = buffer; st->index = index; st->len = len;
    return 0;
}
static inline float texc_load_f(texc_status* st, const float* p, int b, long long n, long long i) { return texc_in_bounds(st, b, i, n) ? p[i] : 0.0f; }
static inline int texc_load_i(texc_status* st, const int* p, int b, long long n, long long i) { return texc_in_bounds(st, b, i, n) ? p[i] : 0; }
static inline void texc_store_f(texc_status* st, float* p, int b, long long n, long long i, float v) { if (texc_in_bounds(st, b, i, n)) p[i] = v; }
static inline void texc_store_i(texc_status* st, int* p, int b, long long n, long long i, int v) { if (texc_in_bounds(st, b, i, n)) p[i] = v; }
static inline int texc_div_i(texc_status* st, int a, int b) { if (b == 0) { if (!st->code) st->code = 2; return 0; } return b == -1 ? -a : a / b; }
static inline int texc_mod_i(texc_status* st, int a, int b) { if (b == 0) { if (!st->code) st->code = 2; return 0; } return b == -1 ? 0 : a % b; }
static inline int texc_f2i(float x) { if (isnan(x)) return 0; if (x >= 2147483648.0f) return INT_MAX; if (x <= -2147483648.0f) return INT_MIN; return (int)x; }
static inline void texc_alloc_failed(texc_status* st, int b) { if (!st->code) { st->code = 3; st->buffer = b; } }

static inline int texc_min_i(int a, int b) { return a < b ? a : b; }
static inline int texc_max_i(int a, int b) { return a > b ? a : b; }
static inline float texc_minimum(float a, float b) { return isnan(a) ? a : (isnan(b) ? b : fminf(a, b)); }
static inline float texc_maximum(float a, float b) { return isnan(a) ? a : (isnan(b) ? b : fmaxf(a, b)); }
static inline float texc_frac(float x) { return x - truncf(x); }
static inline float texc_rsqrt(float x) { return 1.0f / sqrtf(x); }
static inline float texc_rand(void) { return (float)rand() / (float)RAND_MAX; }
";

const CUDA_PRELUDE: &str = "\
__device__ __forceinline__ int texc_min_i(int a, int b) { return a < b ? a : b; }
__device__ __forceinline__ int texc_max_i(int a, int b) { return a > b ? a : b; }
__device__ __forceinline__ float texc_minimum(float a, float b) { return isnan(a) ? a : (isnan(b) ? b : fminf(a, b)); }
__device__ __forceinline__ float texc_maximum(float a, float b) { return isnan(a) ? a : (isnan(b) ? b : fmaxf(a, b)); }
__device__ __forceinline__ float texc_frac(float x) { return x - truncf(x); }
";

/// First fault of a checked host kernel, filled in by the generated code.
///
/// Mirrors the C `texc_status` struct of the prelude.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FaultStatus {
    /// `0` when no fault happened.
    pub code: i32,
    /// Buffer id, as indexed in [`EmittedKernel::buffer_names`].
    pub buffer: i32,
    /// Offending flat index.
    pub index: i64,
    /// Length of the buffer at the time of the access.
    pub len: i64,
}

impl FaultStatus {
    const OUT_OF_BOUNDS: i32 = 1;
    const DIVISION_BY_ZERO: i32 = 2;
    const ALLOCATION: i32 = 3;

    /// Converts the recorded fault into the matching error.
    pub fn check(&self, buffer_names: &[String]) -> Result<(), CodegenError> {
        let name = || {
            usize::try_from(self.buffer)
                .ok()
                .and_then(|b| buffer_names.get(b))
                .cloned()
                .unwrap_or_else(|| format!("#{}", self.buffer))
        };
        match self.code {
            0 => Ok(()),
            Self::OUT_OF_BOUNDS => Err(CodegenError::OutOfBounds {
                buffer: name(),
                index: self.index,
                len: usize::try_from(self.len).unwrap_or(0),
            }),
            Self::DIVISION_BY_ZERO => Err(CodegenError::DivisionByZero),
            Self::ALLOCATION => Err(CodegenError::Internal(format!(
                "allocation of `{}` failed",
                name()
            ))),
            code => Err(CodegenError::Internal(format!("unknown fault code {code}"))),
        }
    }
}

/// Generated source for one kernel function.
#[derive(Clone, Debug)]
pub struct EmittedKernel {
    /// Complete translation unit: prelude plus the kernel definition.
    pub source: String,
    /// Name of the kernel function.
    pub entry: String,
    /// C declarator type of each parameter, in order (`float*`, `int`, ...).
    pub param_types: Vec<String>,
    /// Names for fault reporting: the parameters in order, then every
    /// buffer the kernel allocates.
    pub buffer_names: Vec<String>,
}

/// Whether `dialect` emits checked accesses, and so takes the trailing
/// `const long long* texc_len, texc_status* texc_st` parameters.
pub fn is_checked(dialect: Dialect) -> bool {
    dialect == Dialect::C
}

/// Emits `stmt` as a C function named `entry` taking `params` in order.
pub fn emit_kernel(
    ir: &Ir,
    stmt: &Statement,
    params: &[BufferArg],
    dialect: Dialect,
    entry: &str,
) -> Result<EmittedKernel, CodegenError> {
    let mut emitter = Emitter::new(ir, dialect);
    emitter.indent = 1;

    let mut decls = Vec::with_capacity(params.len());
    let mut param_types = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        emitter.buffer_names.push(param.name.clone());
        if param.is_buffer {
            emitter.lengths.insert(param.var, (i, format!("texc_len[{i}]")));
        }
        let ty = emitter.scalar_type(param.dtype)?;
        let ty = if param.is_buffer {
            format!("{ty}*")
        } else {
            ty.to_string()
        };
        let name = emitter.names.get(param.var, &param.name).to_string();
        decls.push(format!("{ty} {name}"));
        param_types.push(ty);
    }
    if emitter.checked {
        decls.push("const long long* texc_len".into());
        decls.push("texc_status* texc_st".into());
    }

    emitter.stmt(stmt)?;

    let mut source = String::from(match dialect {
        Dialect::C => C_PRELUDE,
        Dialect::Cuda => CUDA_PRELUDE,
    });
    let qualifier = match dialect {
        Dialect::C => "static void",
        Dialect::Cuda => "extern \"C\" __global__ void",
    };
    let _ = writeln!(source, "\n{qualifier} {entry}({}) {{", decls.join(", "));
    source.push_str(&emitter.out);
    source.push_str("}\n");

    Ok(EmittedKernel {
        source,
        entry: entry.to_string(),
        param_types,
        buffer_names: emitter.buffer_names,
    })
}

struct Emitter<'a> {
    ir: &'a Ir,
    dialect: Dialect,
    checked: bool,
    names: UniqueNameManager,
    /// Buffer id and C length expression of every checked buffer.
    lengths: HashMap<Handle<Variable>, (usize, String)>,
    buffer_names: Vec<String>,
    out: String,
    indent: usize,
}

impl<'a> Emitter<'a> {
    fn new(ir: &'a Ir, dialect: Dialect) -> Self {
        Self {
            ir,
            dialect,
            checked: is_checked(dialect),
            names: UniqueNameManager::new(),
            lengths: HashMap::new(),
            buffer_names: Vec::new(),
            out: String::new(),
            indent: 0,
        }
    }

    /// `(id, length)` of a checked buffer.
    fn length(&self, base: Handle<Variable>) -> Result<(usize, String), CodegenError> {
        self.lengths
            .get(&base)
            .cloned()
            .ok_or_else(|| CodegenError::Unbound(self.ir[base].name.clone()))
    }

    fn element_suffix(&self, dtype: Dtype) -> Result<&'static str, CodegenError> {
        match dtype.kind() {
            ScalarKind::Int32 => Ok("i"),
            ScalarKind::Float32 => Ok("f"),
            kind => Err(self.unsupported(format!("buffers of kind {kind}"))),
        }
    }

    fn unsupported(&self, what: impl Into<String>) -> CodegenError {
        CodegenError::Unsupported {
            backend: self.dialect.backend(),
            what: what.into(),
        }
    }

    fn scalar_type(&self, dtype: Dtype) -> Result<&'static str, CodegenError> {
        match dtype.kind() {
            ScalarKind::Int32 => Ok("int"),
            ScalarKind::Float32 => Ok("float"),
            kind => Err(self.unsupported(format!("values of kind {kind}"))),
        }
    }

    fn line(&mut self, text: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn var_name(&mut self, var: Handle<Variable>) -> String {
        let hint = &self.ir[var].name;
        self.names.get(var, hint).to_string()
    }

    /// Lane `lane` of `expr`; scalar operands of vector nodes are shared by
    /// every lane.
    fn lane(&mut self, expr: Handle<Expression>, lane: u32) -> Result<String, CodegenError> {
        let lane = if self.ir.dtype(expr).lanes() == 1 { 0 } else { lane };
        self.expr(expr, lane)
    }

    fn expr(&mut self, expr: Handle<Expression>, lane: u32) -> Result<String, CodegenError> {
        let ir = self.ir;
        let dtype = ir.dtype(expr);
        Ok(match ir[expr] {
            Expression::IntImm(value) => int_literal(value),
            Expression::FloatImm(value) => self.float_literal(value),
            Expression::Var(var) => {
                if ir[var].dtype.kind() == ScalarKind::Handle {
                    return Err(self.unsupported(format!(
                        "buffer `{}` used as a value",
                        ir[var].name
                    )));
                }
                let name = self.var_name(var);
                if dtype.lanes() > 1 {
                    format!("{name}_l{lane}")
                } else {
                    name
                }
            }
            Expression::Binary { op, lhs, rhs } => {
                let a = self.lane(lhs, lane)?;
                let b = self.lane(rhs, lane)?;
                match op {
                    BinaryOp::Mod if dtype.is_float() => format!("fmodf({a}, {b})"),
                    BinaryOp::Div if self.checked && !dtype.is_float() => {
                        format!("texc_div_i(texc_st, {a}, {b})")
                    }
                    BinaryOp::Mod if self.checked => format!("texc_mod_i(texc_st, {a}, {b})"),
                    _ => format!("({a} {} {b})", op.symbol()),
                }
            }
            Expression::Max {
                lhs,
                rhs,
                propagate_nans,
            } => {
                let a = self.lane(lhs, lane)?;
                let b = self.lane(rhs, lane)?;
                let func = match (dtype.is_float(), propagate_nans) {
                    (false, _) => "texc_max_i",
                    (true, true) => "texc_maximum",
                    (true, false) => "fmaxf",
                };
                format!("{func}({a}, {b})")
            }
            Expression::Min {
                lhs,
                rhs,
                propagate_nans,
            } => {
                let a = self.lane(lhs, lane)?;
                let b = self.lane(rhs, lane)?;
                let func = match (dtype.is_float(), propagate_nans) {
                    (false, _) => "texc_min_i",
                    (true, true) => "texc_minimum",
                    (true, false) => "fminf",
                };
                format!("{func}({a}, {b})")
            }
            Expression::CompareSelect { op, lhs, rhs } => {
                let a = self.lane(lhs, lane)?;
                let b = self.lane(rhs, lane)?;
                format!("(({a} {} {b}) ? 1 : 0)", op.symbol())
            }
            Expression::Cast { dtype, value } => {
                let ty = self.scalar_type(dtype)?;
                let v = self.lane(value, lane)?;
                if self.checked && dtype.kind() == ScalarKind::Int32 && ir.dtype(value).is_float() {
                    format!("texc_f2i({v})")
                } else {
                    format!("(({ty})({v}))")
                }
            }
            Expression::Let { var, value, body } => {
                let ty = self.scalar_type(ir[var].dtype)?;
                let mut name = self.var_name(var);
                if ir[var].dtype.lanes() > 1 {
                    let _ = write!(name, "_l{lane}");
                }
                let v = self.lane(value, lane)?;
                let b = self.lane(body, lane)?;
                let body_ty = self.scalar_type(dtype)?;
                match self.dialect {
                    Dialect::C => format!("({{ {ty} {name} = {v}; {b}; }})"),
                    Dialect::Cuda => {
                        format!("([&]() -> {body_ty} {{ {ty} {name} = {v}; return {b}; }}())")
                    }
                }
            }
            Expression::Ramp { base, stride, .. } => {
                let base = self.expr(base, 0)?;
                let stride = self.expr(stride, 0)?;
                format!("({base} + ({lane} * {stride}))")
            }
            Expression::Broadcast { value, .. } => self.expr(value, 0)?,
            Expression::Load { base, index, mask } => {
                let buffer = self.var_name(base);
                let idx = self.lane(index, lane)?;
                let access = if self.checked {
                    let (id, len) = self.length(base)?;
                    let suffix = self.element_suffix(dtype)?;
                    format!("texc_load_{suffix}(texc_st, {buffer}, {id}, {len}, {idx})")
                } else {
                    format!("{buffer}[{idx}]")
                };
                if ir.is_true_mask(mask) {
                    access
                } else {
                    let m = self.lane(mask, lane)?;
                    format!("(({m}) ? {access} : 0)")
                }
            }
            Expression::Intrinsic { op, ref args } => {
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.lane(arg, lane)?);
                }
                self.intrinsic(op, &values)?
            }
            Expression::Call { function, .. } => {
                return Err(CodegenError::Internal(format!(
                    "call to `{}` survived lowering",
                    ir[function].name
                )));
            }
        })
    }

    fn float_literal(&self, value: f32) -> String {
        let cuda = self.dialect == Dialect::Cuda;
        if value.is_nan() {
            return if cuda { "__int_as_float(0x7fffffff)" } else { "NAN" }.into();
        }
        if value.is_infinite() {
            let inf = if cuda {
                "__int_as_float(0x7f800000)"
            } else {
                "INFINITY"
            };
            return if value < 0.0 {
                format!("(-{inf})")
            } else {
                inf.into()
            };
        }
        if value.is_sign_negative() {
            format!("({value:?}f)")
        } else {
            format!("{value:?}f")
        }
    }

    fn intrinsic(&self, op: IntrinsicOp, args: &[String]) -> Result<String, CodegenError> {
        let func = match op {
            IntrinsicOp::Rand => {
                return match self.dialect {
                    Dialect::C => Ok("texc_rand()".into()),
                    Dialect::Cuda => Err(self.unsupported("the `rand` intrinsic")),
                };
            }
            IntrinsicOp::Frac => "texc_frac",
            IntrinsicOp::Rsqrt => match self.dialect {
                Dialect::C => "texc_rsqrt",
                Dialect::Cuda => "rsqrtf",
            },
            _ => "",
        };
        let name = if func.is_empty() {
            format!("{}f", op.name())
        } else {
            func.to_string()
        };
        Ok(format!("{name}({})", args.join(", ")))
    }

    fn stmt(&mut self, stmt: &Statement) -> Result<(), CodegenError> {
        let ir = self.ir;
        match *stmt {
            Statement::Store {
                base,
                index,
                value,
                mask,
            } => {
                let buffer = self.var_name(base);
                let guarded = !ir.is_true_mask(mask);
                for lane in 0..ir.dtype(index).lanes() {
                    let idx = self.lane(index, lane)?;
                    let v = self.lane(value, lane)?;
                    let store = if self.checked {
                        let (id, len) = self.length(base)?;
                        let suffix = self.element_suffix(ir.dtype(value))?;
                        format!("texc_store_{suffix}(texc_st, {buffer}, {id}, {len}, {idx}, {v});")
                    } else {
                        format!("{buffer}[{idx}] = {v};")
                    };
                    if guarded {
                        let m = self.lane(mask, lane)?;
                        self.line(&format!("if ({m}) {{ {store} }}"));
                    } else {
                        self.line(&store);
                    }
                }
            }
            Statement::For {
                var,
                start,
                stop,
                ref body,
                options,
            } => {
                let name = self.var_name(var);
                let start = self.expr(start, 0)?;
                let stop = self.expr(stop, 0)?;
                let binding = match self.dialect {
                    Dialect::Cuda => options
                        .gpu_block_index
                        .map(|axis| ("blockIdx", axis))
                        .or(options.gpu_thread_index.map(|axis| ("threadIdx", axis))),
                    Dialect::C => None,
                };
                match binding {
                    Some((builtin, axis)) => {
                        self.line("{");
                        self.indent += 1;
                        self.line(&format!("int {name} = {start} + (int){builtin}.{axis};"));
                        self.line(&format!("if ({name} < {stop}) {{"));
                        self.indent += 1;
                        self.stmt(body)?;
                        self.indent -= 1;
                        self.line("}");
                        self.indent -= 1;
                        self.line("}");
                    }
                    None => {
                        let live = if self.checked { " && !texc_st->code" } else { "" };
                        self.line(&format!(
                            "for (int {name} = {start}; {name} < {stop}{live}; {name}++) {{"
                        ));
                        self.indent += 1;
                        self.stmt(body)?;
                        self.indent -= 1;
                        self.line("}");
                    }
                }
            }
            Statement::Block(ref stmts) => {
                for stmt in stmts {
                    self.stmt(stmt)?;
                }
            }
            Statement::Allocate {
                buffer,
                dtype,
                ref dims,
            } => {
                if self.dialect == Dialect::Cuda {
                    return Err(self.unsupported("Allocate"));
                }
                let ty = self.scalar_type(dtype)?;
                let name = self.var_name(buffer);
                let len = self.names.fresh(&format!("{name}_len"));
                let mut size = String::from("(long long)1");
                for &dim in dims {
                    let d = self.expr(dim, 0)?;
                    let _ = write!(size, " * (long long)({d})");
                }
                let id = self.buffer_names.len();
                self.buffer_names.push(self.ir[buffer].name.clone());
                self.lengths.insert(buffer, (id, len.clone()));
                self.line(&format!("long long {len} = {size};"));
                self.line(&format!(
                    "{ty}* {name} = ({ty}*)malloc(sizeof({ty}) * (size_t)({len} > 0 ? {len} : 1));"
                ));
                self.line(&format!(
                    "if (!{name}) {{ texc_alloc_failed(texc_st, {id}); {len} = 0; }}"
                ));
            }
            Statement::Free { buffer } => {
                if self.dialect == Dialect::Cuda {
                    return Err(self.unsupported("Free"));
                }
                let name = self.var_name(buffer);
                self.line(&format!("free({name});"));
            }
        }
        Ok(())
    }
}

fn int_literal(value: i32) -> String {
    match value {
        i32::MIN => "(-2147483647 - 1)".into(),
        v if v < 0 => format!("({v})"),
        v => v.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use texc_ir::{CompareOp, GpuAxis, KernelScope, LoopOptions};

    fn squash(s: &str) -> String {
        s.split_whitespace().collect()
    }

    #[test]
    fn simple_loop() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::FLOAT32, [8]).unwrap();
        let b = k.buffer("b", Dtype::FLOAT32, [8]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let zero = k.int(0);
        let value = a.load([i]) * 2.0f32;
        let params = [BufferArg::from(a), BufferArg::from(b)];
        let mut ir = k.ir_mut();
        let index = ir.var_expr(i.handle());
        let one = ir.int_imm(1);
        let store = ir
            .store(b.handle(), index, value.handle(), one)
            .unwrap();
        let eight = ir.int_imm(8);
        let stmt = Statement::For {
            var: i.handle(),
            start: zero.handle(),
            stop: eight,
            body: Box::new(store),
            options: LoopOptions::default(),
        };
        let kernel = emit_kernel(&ir, &stmt, &params, Dialect::C, "texc_kernel").unwrap();
        assert_eq!(kernel.param_types, ["float*", "float*"]);
        assert_eq!(kernel.buffer_names, ["a", "b"]);
        assert!(kernel.source.contains(
            "static void texc_kernel(float* a, float* b, const long long* texc_len, texc_status* texc_st) {"
        ));
        assert!(squash(&kernel.source).contains(&squash(
            "for (int i = 0; i < 8 && !texc_st->code; i++) {
               texc_store_f(texc_st, b, 1, texc_len[1], i,
                 (texc_load_f(texc_st, a, 0, texc_len[0], (i * 1)) * 2.0f));
             }"
        )));

        let cuda = emit_kernel(&ir, &stmt, &params, Dialect::Cuda, "texc_kernel").unwrap();
        assert!(squash(&cuda.source).contains(&squash(
            "for (int i = 0; i < 8; i++) { b[i] = (a[(i * 1)] * 2.0f); }"
        )));
        assert!(!cuda.source.contains("texc_st"));
    }

    #[test]
    fn masked_store_and_load() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [4]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let guard = i.expr().compare(CompareOp::Lt, 3);
        let loaded = a.load_flat(i.expr(), guard).unwrap();
        let stmt = a.store_flat(i.expr(), loaded + 1, guard).unwrap();
        let params = [BufferArg::from(a), BufferArg::from(i)];
        let ir = k.ir();
        let kernel = emit_kernel(&ir, &stmt, &params, Dialect::Cuda, "texc_kernel").unwrap();
        assert!(kernel.source.contains("void texc_kernel(int* a, int i) {"));
        assert!(kernel.source.contains(
            "if (((i < 3) ? 1 : 0)) { a[i] = (((((i < 3) ? 1 : 0)) ? a[i] : 0) + 1); }"
        ));

        let checked = emit_kernel(&ir, &stmt, &params, Dialect::C, "texc_kernel").unwrap();
        let load = "texc_load_i(texc_st, a, 0, texc_len[0], i)";
        assert!(checked.source.contains(&format!(
            "if (((i < 3) ? 1 : 0)) {{ texc_store_i(texc_st, a, 0, texc_len[0], i, (((((i < 3) ? 1 : 0)) ? {load} : 0) + 1)); }}"
        )));
    }

    #[test]
    fn checked_integer_division_and_casts() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [4]).unwrap();
        let i = k.var("i", Dtype::INT32);
        let f = k.var("f", Dtype::FLOAT32);
        let value = (i.expr() / 3) % i + f.expr().cast(Dtype::INT32).unwrap();
        let stmt = a.store_flat(i.expr(), value, k.int(1)).unwrap();
        let params = [BufferArg::from(a), BufferArg::from(i), BufferArg::from(f)];
        let ir = k.ir();
        let kernel = emit_kernel(&ir, &stmt, &params, Dialect::C, "texc_kernel").unwrap();
        assert!(kernel.source.contains(
            "(texc_mod_i(texc_st, texc_div_i(texc_st, i, 3), i) + texc_f2i(f))"
        ));
        let cuda = emit_kernel(&ir, &stmt, &params, Dialect::Cuda, "texc_kernel").unwrap();
        assert!(cuda.source.contains("(((i / 3) % i) + ((int)(f)))"));
    }

    #[test]
    fn allocations_are_checked() {
        let k = KernelScope::new();
        let t = k.compute("t", &[k.dim(6, "i")], |v| v[0] * 2).unwrap();
        let buffer = t.buffer();
        let data = buffer.data().handle();
        let ir = k.ir();
        let stmt = Statement::Block(vec![
            Statement::Allocate {
                buffer: data,
                dtype: Dtype::INT32,
                dims: ir[buffer.handle()].dims.clone(),
            },
            Statement::Free { buffer: data },
        ]);
        let kernel = emit_kernel(&ir, &stmt, &[], Dialect::C, "texc_kernel").unwrap();
        assert_eq!(kernel.buffer_names, ["t"]);
        assert!(kernel.source.contains("long long t_len = (long long)1 * (long long)(6);"));
        assert!(kernel.source.contains("if (!t) { texc_alloc_failed(texc_st, 0); t_len = 0; }"));
        assert!(matches!(
            emit_kernel(&ir, &stmt, &[], Dialect::Cuda, "k"),
            Err(CodegenError::Unsupported { backend: BackendKind::Cuda, .. })
        ));
    }

    #[test]
    fn fault_status_maps_to_errors() {
        let names = ["a".to_string(), "n".to_string()];
        assert!(FaultStatus::default().check(&names).is_ok());
        let oob = FaultStatus {
            code: 1,
            buffer: 0,
            index: 100_000,
            len: 4,
        };
        assert!(matches!(
            oob.check(&names),
            Err(CodegenError::OutOfBounds { buffer, index: 100_000, len: 4 }) if buffer == "a"
        ));
        let div = FaultStatus {
            code: 2,
            ..Default::default()
        };
        assert!(matches!(div.check(&names), Err(CodegenError::DivisionByZero)));
    }

    #[test]
    fn vector_store_is_scalarized() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::INT32, [4]).unwrap();
        let ramp = k.ramp(0, 1, 4).unwrap();
        let value = k.broadcast(7, 4).unwrap();
        let mask = k.broadcast(1, 4).unwrap();
        let stmt = a.store_flat(ramp, value, mask).unwrap();
        let ir = k.ir();
        let kernel =
            emit_kernel(&ir, &stmt, &[BufferArg::from(a)], Dialect::C, "texc_kernel").unwrap();
        for lane in 0..4 {
            assert!(kernel.source.contains(&format!("a[(0 + ({lane} * 1))] = 7;")));
        }
    }

    #[test]
    fn intrinsic_names() {
        let ir = Ir::new();
        let emitter = Emitter::new(&ir, Dialect::Cuda);
        let args = ["x".to_string()];
        assert_eq!(emitter.intrinsic(IntrinsicOp::Erf, &args).unwrap(), "erff(x)");
        assert_eq!(emitter.intrinsic(IntrinsicOp::Rsqrt, &args).unwrap(), "rsqrtf(x)");
        assert_eq!(emitter.intrinsic(IntrinsicOp::Frac, &args).unwrap(), "texc_frac(x)");
        assert!(matches!(
            emitter.intrinsic(IntrinsicOp::Rand, &[]),
            Err(CodegenError::Unsupported { backend: BackendKind::Cuda, .. })
        ));
    }

    #[test]
    fn literals() {
        assert_eq!(int_literal(i32::MIN), "(-2147483647 - 1)");
        assert_eq!(int_literal(-3), "(-3)");
        let ir = Ir::new();
        let emitter = Emitter::new(&ir, Dialect::C);
        assert_eq!(emitter.float_literal(1.0), "1.0f");
        assert_eq!(emitter.float_literal(-0.5), "(-0.5f)");
        assert_eq!(emitter.float_literal(f32::NAN), "NAN");
        assert_eq!(emitter.float_literal(f32::NEG_INFINITY), "(-INFINITY)");
    }

    #[test]
    fn cuda_binds_gpu_loops() {
        let k = KernelScope::new();
        let a = k.buffer("a", Dtype::FLOAT32, [64]).unwrap();
        let x = k.var("x", Dtype::INT32);
        let stmt = a.store_flat(x.expr(), k.float(1.0), k.int(1)).unwrap();
        let params = [BufferArg::from(a)];
        let mut ir = k.ir_mut();
        let zero = ir.int_imm(0);
        let stop = ir.int_imm(64);
        let stmt = Statement::For {
            var: x.handle(),
            start: zero,
            stop,
            body: Box::new(stmt),
            options: LoopOptions::thread(GpuAxis::X),
        };
        let kernel =
            emit_kernel(&ir, &stmt, &params, Dialect::Cuda, "texc_kernel").unwrap();
        assert!(kernel.source.contains("extern \"C\" __global__ void texc_kernel(float* a)"));
        assert!(kernel.source.contains("int x = 0 + (int)threadIdx.x;"));
        assert!(kernel.source.contains("if (x < 64) {"));
        assert!(!kernel.source.contains("for ("));

        let c = emit_kernel(&ir, &stmt, &params, Dialect::C, "k").unwrap();
        assert!(c.source.contains("for (int x = 0; x < 64 && !texc_st->code; x++) {"));
    }
}
