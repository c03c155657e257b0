#![no_main]

use libfuzzer_sys::fuzz_target;
use texc::{
    BackendKind, BufferArg, CallArg, CodegenOptions, Dtype, KernelScope, Schedule,
    create_codegen,
};

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let rows = i32::from(data[0] % 12) + 1;
    let cols = i32::from(data[1] % 12) + 1;

    let k = KernelScope::new();
    let a = k.buffer("a", Dtype::FLOAT32, [rows, cols]).unwrap();
    let dims = [k.dim(rows, "i"), k.dim(cols, "j")];
    let t = k
        .compute("t", &dims, |v| a.load([v[0], v[1]]) * 2.0f32)
        .unwrap();
    let out = k
        .compute("out", &dims, |v| t.call([v[0], v[1]]) + 1.0f32)
        .unwrap();
    let mut schedule = Schedule::new(&k, &[out]).unwrap();

    // Any sequence of transformations either fails cleanly or keeps the
    // program equivalent.
    for chunk in data[2..].chunks(2).take(6) {
        let &[op, factor] = chunk else {
            break;
        };
        let factor = i32::from(factor % 9);
        let tensor = if op & 1 == 0 { out } else { t };
        let Ok(vars) = schedule.loop_vars(tensor) else {
            continue;
        };
        let var = vars[usize::from(op >> 1) % vars.len()];
        let inner_first = op & 0x80 == 0;
        let _ = match (op >> 4) % 3 {
            0 => schedule.split_with_tail(var, factor, inner_first).map(drop),
            1 => schedule.split_with_mask(var, factor, inner_first).map(drop),
            _ => schedule.compute_inline(t),
        };
    }

    let stmt = schedule.lower().expect("lowering failed");
    let params = vec![BufferArg::from(a), BufferArg::from(out)];
    let eval = create_codegen(
        BackendKind::SimpleIrEval,
        k.freeze(),
        &stmt,
        params,
        &CodegenOptions::default(),
    )
    .unwrap();

    let input: Vec<f32> = (0..rows * cols).map(|x| x as f32).collect();
    let mut output = vec![0.0f32; input.len()];
    eval.call(&[CallArg::input(&input), CallArg::buffer(&mut output)])
        .expect("scheduled program faulted");
    for (x, y) in input.iter().zip(&output) {
        assert_eq!(*y, x * 2.0 + 1.0);
    }
});
