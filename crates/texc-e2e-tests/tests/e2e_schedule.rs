//! Scheduling transformations checked by running the lowered program.

mod common;

use texc::{BufferArg, CallArg, Dtype, KernelScope, Schedule, Tensor};

fn sum_of_squares<'k>(k: &'k KernelScope, n: i32) -> Tensor<'k> {
    k.compute("f", &[k.dim(n, "x"), k.dim(5, "y")], |v| {
        1 + v[0] * v[0] + v[1] * v[1]
    })
    .unwrap()
}

fn expected_sum_of_squares(n: i32) -> Vec<i32> {
    (0..n)
        .flat_map(|x| (0..5).map(move |y| 1 + x * x + y * y))
        .collect()
}

#[test]
fn split_with_tail_covers_every_element() {
    common::init_logger();
    for inner_first in [true, false] {
        let k = KernelScope::new();
        let f = sum_of_squares(&k, 26);
        let mut s = Schedule::new(&k, &[f]).unwrap();
        let split = s.split_with_tail(f.arg(0), 4, inner_first).unwrap();
        assert!(split.tail.is_some());
        let stmt = s.lower().unwrap();
        let params = vec![BufferArg::from(f)];

        for codegen in common::host_backends(k.freeze(), &stmt, params) {
            let mut out = vec![-1i32; 26 * 5];
            codegen.call(&[CallArg::buffer(&mut out)]).unwrap();
            assert_eq!(out, expected_sum_of_squares(26), "{}", codegen.kind());
        }
    }
}

#[test]
fn split_with_tail_on_symbolic_extent() {
    let k = KernelScope::new();
    let n = k.var("n", Dtype::INT32);
    let f = k
        .compute("f", &[k.dim(n, "x"), k.dim(5, "y")], |v| {
            1 + v[0] * v[0] + v[1] * v[1]
        })
        .unwrap();
    let mut s = Schedule::new(&k, &[f]).unwrap();
    s.split_with_tail(f.arg(0), 4, true).unwrap();
    let stmt = s.lower().unwrap();
    let params = vec![BufferArg::from(f), BufferArg::from(n)];

    let eval = common::interpreter(k.freeze(), &stmt, params);
    for size in [1, 4, 7, 26] {
        let mut out = vec![-1i32; size as usize * 5];
        eval.call(&[CallArg::buffer(&mut out), CallArg::Int(size)])
            .unwrap();
        assert_eq!(out, expected_sum_of_squares(size), "n = {size}");
    }
}

#[test]
fn split_with_mask_never_faults() {
    let (rows, cols) = (26i32, 5i32);
    let input: Vec<f32> = (0..rows * cols).map(|i| i as f32 * 0.25).collect();
    let expected: Vec<f32> = input.iter().map(|v| v * 2.0 + 1.0).collect();

    for factor in 1..=12 {
        for axis in 0..2 {
            let k = KernelScope::new();
            let a = k.buffer("a", Dtype::FLOAT32, [rows, cols]).unwrap();
            let b = k
                .compute("b", &[k.dim(rows, "i"), k.dim(cols, "j")], |v| {
                    a.load([v[0], v[1]]) * 2.0f32 + 1.0f32
                })
                .unwrap();
            let mut s = Schedule::new(&k, &[b]).unwrap();
            s.split_with_mask(b.arg(axis), factor, true).unwrap();
            let stmt = s.lower().unwrap();

            for codegen in common::host_backends(k.freeze(), &stmt, vec![a.into(), b.into()]) {
                let mut out = vec![0.0f32; (rows * cols) as usize];
                codegen
                    .call(&[CallArg::input(&input), CallArg::buffer(&mut out)])
                    .unwrap_or_else(|e| {
                        panic!("factor {factor} on axis {axis} on {}: {e}", codegen.kind())
                    });
                assert_eq!(out, expected, "factor {factor} on axis {axis}");
            }
        }
    }
}

#[test]
fn masked_lanes_are_never_evaluated() {
    // `100 / (i - 10)` divides by zero one step past the extent.
    let k = KernelScope::new();
    let out = k
        .compute("out", &[k.dim(10, "i")], |v| 100 / (v[0] - 10))
        .unwrap();
    let mut s = Schedule::new(&k, &[out]).unwrap();
    s.split_with_mask(out.arg(0), 4, true).unwrap();
    let stmt = s.lower().unwrap();
    let expected: Vec<i32> = (0..10).map(|i| 100 / (i - 10)).collect();

    for codegen in common::host_backends(k.freeze(), &stmt, vec![BufferArg::from(out)]) {
        let mut values = vec![0i32; 10];
        codegen
            .call(&[CallArg::buffer(&mut values)])
            .unwrap_or_else(|e| panic!("{} failed: {e}", codegen.kind()));
        assert_eq!(values, expected, "{}", codegen.kind());
    }
}

#[test]
fn tail_loops_can_be_split_again() {
    let k = KernelScope::new();
    let f = sum_of_squares(&k, 26);
    let mut s = Schedule::new(&k, &[f]).unwrap();
    s.split_with_tail(f.arg(0), 4, true).unwrap();
    s.split_with_mask(f.arg(1), 3, true).unwrap();
    let tail_y = *s.loop_vars(f).unwrap().last().unwrap();
    assert_eq!(tail_y.name(), "y.tail");
    s.split_with_tail(tail_y, 2, false).unwrap();
    let stmt = s.lower().unwrap();
    let text = k.format_stmt(&stmt);
    assert!(text.contains("y.tail.outer"));
    assert!(text.contains("y.outer"));

    for codegen in common::host_backends(k.freeze(), &stmt, vec![BufferArg::from(f)]) {
        let mut out = vec![-1i32; 26 * 5];
        codegen.call(&[CallArg::buffer(&mut out)]).unwrap();
        assert_eq!(out, expected_sum_of_squares(26), "{}", codegen.kind());
    }
}

/// `x = a * b; y = c * d + x; z = x + y` over a 4×5×6 domain.
fn build_chain(k: &KernelScope) -> (Vec<BufferArg>, [Tensor<'_>; 3]) {
    let shape = [4, 5, 6];
    let a = k.buffer("a", Dtype::FLOAT32, shape).unwrap();
    let b = k.buffer("b", Dtype::FLOAT32, shape).unwrap();
    let c = k.buffer("c", Dtype::FLOAT32, shape).unwrap();
    let d = k.buffer("d", Dtype::FLOAT32, shape).unwrap();
    let dims = [k.dim(4, "m"), k.dim(5, "n"), k.dim(6, "k")];
    let x = k
        .compute("x", &dims, |v| a.load(v.iter().copied()) * b.load(v.iter().copied()))
        .unwrap();
    let y = k
        .compute("y", &dims, |v| {
            c.load(v.iter().copied()) * d.load(v.iter().copied()) + x.call(v.iter().copied())
        })
        .unwrap();
    let z = k
        .compute("z", &dims, |v| x.call(v.iter().copied()) + y.call(v.iter().copied()))
        .unwrap();
    let inputs = vec![a.into(), b.into(), c.into(), d.into()];
    (inputs, [x, y, z])
}

#[test]
fn inlining_any_subset_preserves_results() {
    let len = 4 * 5 * 6;
    let data: Vec<Vec<f32>> = (0..4)
        .map(|s| (0..len).map(|i| (i as f32 + 1.0) * (0.1 + s as f32 * 0.7)).collect())
        .collect();
    let expected: Vec<f32> = (0..len)
        .map(|i| {
            let x = data[0][i] * data[1][i];
            let y = data[2][i] * data[3][i] + x;
            x + y
        })
        .collect();

    // Index sets into [x, y], including both orders of the full set.
    let subsets: [&[usize]; 5] = [&[], &[0], &[1], &[0, 1], &[1, 0]];
    for subset in subsets {
        let k = KernelScope::new();
        let (mut params, [x, y, z]) = build_chain(&k);
        let intermediates = [x, y];
        let mut s = Schedule::new(&k, &[z]).unwrap();
        for &i in subset {
            s.compute_inline(intermediates[i]).unwrap();
        }
        let stmt = s.lower().unwrap();
        let text = k.format_stmt(&stmt);
        assert_eq!(text.contains("Allocate(x"), !subset.contains(&0), "{subset:?}");
        assert_eq!(text.contains("Allocate(y"), !subset.contains(&1), "{subset:?}");
        params.push(z.into());

        for codegen in common::host_backends(k.freeze(), &stmt, params) {
            let mut out = vec![0.0f32; len];
            codegen
                .call(&[
                    CallArg::input(&data[0]),
                    CallArg::input(&data[1]),
                    CallArg::input(&data[2]),
                    CallArg::input(&data[3]),
                    CallArg::buffer(&mut out),
                ])
                .unwrap();
            assert_eq!(out, expected, "{subset:?} on {}", codegen.kind());
        }
    }
}

#[test]
fn identical_builds_lower_identically() {
    let lower = || {
        let k = KernelScope::new();
        let (_, [x, _, z]) = build_chain(&k);
        let mut s = Schedule::new(&k, &[z]).unwrap();
        s.compute_inline(x).unwrap();
        s.split_with_mask(z.arg(0), 3, false).unwrap();
        s.split_with_tail(z.arg(2), 4, true).unwrap();
        let stmt = s.lower().unwrap();
        k.format_stmt(&stmt)
    };
    let first = lower();
    assert_eq!(first, lower());
    assert!(first.contains("k.tail"));
    assert!(first.contains("mask="));
}
