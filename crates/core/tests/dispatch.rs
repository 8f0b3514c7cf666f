//! End-to-end dispatch tests on the host reference backend

mod common;

use common::{backend, init_logger, ADD5, COPY, OUTBUFS, SUM, TO_FLOAT};
use kite_core::backend::status;
use kite_core::prelude::*;
use kite_core::value::values_of;
use kite_core::{args, ExecutionError, WorkGeometry};

#[test]
fn test_implicit_sequence_is_an_input_buffer() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, COPY).unwrap();

    let mut out = TypedBuffer::output(3).unwrap();
    let result = program.invoke("copy", args![&mut out, vec![1, 2, 3]]).unwrap();

    assert_eq!(result.one().unwrap(), &values_of(&[2, 3, 4]));
    assert_eq!(out, values_of(&[2, 3, 4]));
}

#[test]
fn test_float_output() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, TO_FLOAT).unwrap();

    let input: Vec<i32> = (1..=256).collect();
    let mut out = TypedBuffer::output_as(input.len(), "float").unwrap();
    program
        .invoke("to_float", args![&mut out, input.clone()])
        .unwrap();

    let expected: Vec<f32> = input.iter().map(|&v| v as f32 + 0.5).collect();
    assert_eq!(out.values_as::<f32>().unwrap(), expected);
}

#[test]
fn test_large_buffer_without_total() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, COPY).unwrap();

    let input: Vec<i32> = (1..=50446).collect();
    let mut out = TypedBuffer::output(input.len()).unwrap();
    program.invoke("copy", args![&mut out, input]).unwrap();

    let expected: Vec<i32> = (2..=50447).collect();
    assert_eq!(out.values_as::<i32>().unwrap(), expected);
    assert_eq!(
        backend.last_geometry().map(|g| g.global),
        Some([50446, 1, 1])
    );
}

#[test]
fn test_times_overrides_global_size() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, SUM).unwrap();

    let input: Vec<i32> = (1..=517).collect();
    let half = input.len() / 2;
    let expected: i32 = input.iter().filter(|&&v| v as usize <= half).sum();

    let mut out = TypedBuffer::from_slice(&[0]).unwrap().into_output();
    program
        .invoke(
            "sum",
            args![&mut out, input, DispatchOptions::new().times(half)],
        )
        .unwrap();
    assert_eq!(out.get(0), Some(Value::Int(expected as i64)));
}

#[test]
fn test_largest_buffer_sets_global_size() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, SUM).unwrap();

    let input: Vec<i32> = (1..=517).collect();
    let expected: i32 = input.iter().sum();

    let mut out = TypedBuffer::from_slice(&[0]).unwrap().into_output();
    program.invoke("sum", args![&mut out, input]).unwrap();
    assert_eq!(out.get(0), Some(Value::Int(expected as i64)));
}

#[test]
fn test_outputs_are_returned_in_call_order() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, OUTBUFS).unwrap();

    let mut a = TypedBuffer::output(10).unwrap();
    let mut b = TypedBuffer::output(10).unwrap();
    let mut c = TypedBuffer::output(10).unwrap();
    let result = program
        .invoke("outbufs", args![&mut a, &mut b, 5, &mut c])
        .unwrap();

    let buffers = result.buffers();
    assert_eq!(buffers.len(), 3);
    assert_eq!(buffers[0], &vec![Value::Int(6); 10]);
    assert_eq!(buffers[1], &vec![Value::Int(7); 10]);
    assert_eq!(buffers[2], &vec![Value::Int(8); 10]);
}

#[test]
fn test_two_outputs_of_different_lengths() {
    init_logger();
    let backend = backend();
    let program = Program::new(
        &backend,
        "__kernel void pair(__global int *a, __global int *b) { }",
    )
    .unwrap();

    let mut a = TypedBuffer::output(5).unwrap();
    let mut b = TypedBuffer::output(8).unwrap();
    let result = program.invoke("pair", args![&mut a, &mut b]).unwrap();

    let WorkGeometry { global, .. } = backend.last_geometry().unwrap();
    assert!(global[0] >= 8);
    let buffers = result.buffers();
    assert_eq!(buffers.len(), 2);
    assert_eq!(buffers[0].len(), 5);
    assert_eq!(buffers[1].len(), 8);
}

#[test]
fn test_two_outputs_under_legacy_policy() {
    init_logger();
    let backend = backend().with_preferred_work_group_size(4);
    let program = Program::with_config(
        &backend,
        "__kernel void pair(__global int *a, __global int *b) { }",
        ProgramConfig::default().with_policy(WorkSizePolicy::Legacy),
    )
    .unwrap();

    let mut a = TypedBuffer::output(5).unwrap();
    let mut b = TypedBuffer::output(8).unwrap();
    let result = program.invoke("pair", args![&mut a, &mut b]).unwrap();

    let geometry = backend.last_geometry().unwrap();
    assert_eq!(geometry.dimensions, 1);
    assert_eq!(geometry.global, [8, 1, 1]);
    assert_eq!(geometry.local, Some([4, 1, 1]));
    assert_eq!(result.len(), 2);
}

#[test]
fn test_input_marked_as_output_is_returned() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, ADD5).unwrap();

    let mut data = TypedBuffer::from_slice(&[1, 2, 3]).unwrap().into_output();
    let result = program.invoke("add5", args![&mut data]).unwrap();
    assert_eq!(result.one().unwrap(), &values_of(&[6, 7, 8]));
}

#[test]
fn test_no_outputs_returns_nothing() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, "__kernel void x(int x) { }").unwrap();
    assert!(program.invoke("x", args![1]).unwrap().is_nothing());
}

#[test]
fn test_unchanged_buffers_are_not_rewritten() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, ADD5).unwrap();

    let mut data = TypedBuffer::from_slice(&[1, 2, 3]).unwrap();
    program.invoke("add5", args![&mut data]).unwrap();
    assert_eq!(backend.stats().writes(), 1);

    program.invoke("add5", args![&mut data]).unwrap();
    assert_eq!(backend.stats().writes(), 1);
    assert_eq!(backend.stats().allocations(), 1);

    data.set(0, 10).unwrap();
    program.invoke("add5", args![&mut data]).unwrap();
    assert_eq!(backend.stats().writes(), 2);
}

#[test]
fn test_read_back_leaves_output_clean() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, ADD5).unwrap();

    let mut data = TypedBuffer::from_slice(&[1, 2, 3]).unwrap().into_output();
    program.invoke("add5", args![&mut data]).unwrap();
    program.invoke("add5", args![&mut data]).unwrap();
    assert_eq!(data, values_of(&[11, 12, 13]));
    assert_eq!(backend.stats().writes(), 1);
}

#[test]
fn test_missing_kernel_leaves_program_usable() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, COPY).unwrap();

    let err = program.invoke("not_copy", Vec::new()).unwrap_err();
    assert!(matches!(err, KiteError::KernelNotFound(name) if name == "not_copy"));

    let mut out = TypedBuffer::output(2).unwrap();
    program.invoke("copy", args![&mut out, vec![1, 2]]).unwrap();
    assert_eq!(out, values_of(&[2, 3]));
}

#[test]
fn test_wrong_argument_count() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, "__kernel void x_y_z(int x) { }").unwrap();

    let err = program.invoke("x_y_z", args![0, 0]).unwrap_err();
    assert!(matches!(err, KiteError::ArgumentBinding { index: 1, .. }));
    assert_eq!(backend.stats().live_dispatch_handles(), 0);
}

#[test]
fn test_buffer_where_scalar_expected() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, "__kernel void sum(int x, __global int *y) { }").unwrap();

    let err = program.invoke("sum", args![1, 2]).unwrap_err();
    match err {
        KiteError::ArgumentBinding {
            index, argument, ..
        } => {
            assert_eq!(index, 1);
            assert_eq!(argument, "2");
        }
        other => panic!("unexpected {other}"),
    }

    let mut extra = TypedBuffer::output(1).unwrap();
    let err = program
        .invoke("sum", args![1, &mut extra, 3])
        .unwrap_err();
    assert!(matches!(err, KiteError::ArgumentBinding { index: 2, .. }));
    assert!(extra.is_dirty());
}

#[test]
fn test_invalid_options() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, "__kernel void sum(int x) { }").unwrap();

    let err = program
        .invoke("sum", args![1, DispatchOptions::new().times(2.5)])
        .unwrap_err();
    assert!(matches!(err, KiteError::InvalidOptions(_)));

    let err = program
        .invoke("sum", args![1, DispatchOptions::new().set("time", 1)])
        .unwrap_err();
    assert!(matches!(err, KiteError::InvalidOptions(_)));
}

#[test]
fn test_local_size_hint() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, COPY).unwrap();

    let mut out = TypedBuffer::output(100).unwrap();
    let input: Vec<i32> = (0..100).collect();
    program
        .invoke(
            "copy",
            args![&mut out, input, DispatchOptions::new().local_size(32)],
        )
        .unwrap();
    let geometry = backend.last_geometry().unwrap();
    assert_eq!(geometry.global, [128, 1, 1]);
    assert_eq!(geometry.local, Some([32, 1, 1]));
}

#[test]
fn test_device_failure_reports_raw_status() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, ADD5).unwrap();
    let mut data = TypedBuffer::from_slice(&[1]).unwrap();

    backend.fail_next_enqueue(status::OUT_OF_RESOURCES);
    let err = program.invoke("add5", args![&mut data]).unwrap_err();
    match err {
        KiteError::Execution(ExecutionError::Device { kernel, status: s }) => {
            assert_eq!(kernel, "add5");
            assert_eq!(s.code, status::OUT_OF_RESOURCES);
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(backend.stats().live_dispatch_handles(), 0);

    program.invoke("add5", args![&mut data]).unwrap();
}

#[test]
fn test_typed_sequence_argument() {
    init_logger();
    let backend = backend();
    let program = Program::new(&backend, COPY).unwrap();

    let mut out = TypedBuffer::output(3).unwrap();
    let input = Arg::sequence_as(values_of(&[1, 2, 3]), "int").unwrap();
    program
        .invoke("copy", vec![Arg::from(&mut out), input])
        .unwrap();
    assert_eq!(out, values_of(&[2, 3, 4]));
}

#[test]
fn test_compile_error_carries_build_log() {
    init_logger();
    let backend = backend();
    let err = Program::new(&backend, "fib { SYNTAXERROR }").err().unwrap();
    match err {
        KiteError::Compile { log } => {
            assert!(log.starts_with("<source>:1:1: error:"), "{log}");
        }
        other => panic!("unexpected {other}"),
    }
}
