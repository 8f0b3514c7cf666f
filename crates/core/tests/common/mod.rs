//! Shared helpers for kite-core integration tests

use kite_core::backend::host::HostBackend;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Host backend with the kernels used across the integration tests
pub fn backend() -> HostBackend {
    HostBackend::new()
        .with_kernel("copy", |launch| {
            let input = launch.buffer::<i32>(1)?;
            let out: Vec<i32> = input.iter().map(|v| v + 1).collect();
            launch.store(0, &out)
        })
        .with_kernel("to_float", |launch| {
            let input = launch.buffer::<i32>(1)?;
            let out: Vec<f32> = input.iter().map(|&v| v as f32 + 0.5).collect();
            launch.store(0, &out)
        })
        .with_kernel("add5", |launch| {
            let data: Vec<i32> = launch.buffer::<i32>(0)?.iter().map(|v| v + 5).collect();
            launch.store(0, &data)
        })
        .with_kernel("sum", |launch| {
            let input = launch.buffer::<i32>(1)?;
            let n = launch.global_size().min(input.len());
            let total: i32 = input[..n].iter().sum();
            launch.store(0, &[total])
        })
        .with_kernel("outbufs", |launch| {
            let x = launch.scalar::<i32>(2)?;
            let len = launch.buffer::<i32>(0)?.len();
            launch.store(0, &vec![x + 1; len])?;
            launch.store(1, &vec![x + 2; len])?;
            launch.store(3, &vec![x + 3; len])
        })
}

pub const COPY: &str = "
__kernel void copy(__global int *out, __global int *in) {
    int i = get_global_id(0);
    out[i] = in[i] + 1;
}";

pub const TO_FLOAT: &str = "
__kernel void to_float(__global float *out, __global int *in) {
    int id = get_global_id(0);
    out[id] = (float)in[id] + 0.5;
}";

pub const ADD5: &str = "
__kernel void add5(__global int *data) {
    int i = get_global_id(0);
    data[i] = data[i] + 5;
}";

pub const SUM: &str = "
#pragma OPENCL EXTENSION cl_khr_global_int32_base_atomics : enable
__kernel void sum(__global int *out, __global int *in) {
    int id = get_global_id(0);
    atomic_add(out, in[id]);
}";

pub const OUTBUFS: &str = "
__kernel void outbufs(__global int *a, __global int *b, int x, __global int *c) {
    int i = get_global_id(0);
    a[i] = x + 1; b[i] = x + 2; c[i] = x + 3;
}";
