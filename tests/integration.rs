//! End-to-end scenarios exercising the builder, planner, request, and
//! CPU executor together.

use tensorplan::diag::Diagnostics;
use tensorplan::dispatch;
use tensorplan::driver::{Capabilities, Driver, PreparedModel, Status};
use tensorplan::event::Completer;
use tensorplan::executor::CpuExecutor;
use tensorplan::model::Model;
use tensorplan::planner::{plan, Preference};
use tensorplan::request::Request;
use tensorplan::types::{ElementType, QuantParams, Shape};
use tensorplan::{ModelBuilder, OpKind};

fn run(model: &Model, request: &mut Request) {
    request.start_compute().expect("start_compute");
    let mut diagnostics = Diagnostics::default();
    CpuExecutor::run(model, request, &mut diagnostics).expect("execution");
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn f32_out(request: &mut Request, position: usize) -> Vec<f32> {
    bytemuck::cast_slice(request.output_bytes_mut(position).unwrap()).to_vec()
}

#[test]
fn two_tensor_add() {
    let mut b = ModelBuilder::new();
    let a = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    let c = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    let out = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    b.add_operation(OpKind::Add, vec![a, c], vec![out]).unwrap();
    b.identify_inputs_and_outputs(vec![a, c], vec![out]).unwrap();
    let model = b.finish().unwrap();

    let mut request = Request::new(&model);
    request.set_input(0, f32_bytes(&[1.0, 2.0])).unwrap();
    request.set_input(1, f32_bytes(&[3.0, 4.0])).unwrap();
    request.set_output(0, vec![0u8; 8]).unwrap();
    run(&model, &mut request);

    assert_eq!(f32_out(&mut request, 0), vec![4.0, 6.0]);
}

#[test]
fn broadcast_commutativity() {
    let build = |first: u32, second: u32| {
        let mut b = ModelBuilder::new();
        let x = b.add_operand(ElementType::TensorF32, Shape::new(vec![first])).unwrap();
        let y = b.add_operand(ElementType::TensorF32, Shape::new(vec![second])).unwrap();
        let out = b.add_operand(ElementType::TensorF32, Shape::new(vec![first.max(second)])).unwrap();
        b.add_operation(OpKind::Add, vec![x, y], vec![out]).unwrap();
        b.identify_inputs_and_outputs(vec![x, y], vec![out]).unwrap();
        b.finish().unwrap()
    };
    let ab = build(2, 2);
    let ba = build(2, 2);

    let mut req_ab = Request::new(&ab);
    req_ab.set_input(0, f32_bytes(&[1.0, 2.0])).unwrap();
    req_ab.set_input(1, f32_bytes(&[3.0, 4.0])).unwrap();
    req_ab.set_output(0, vec![0u8; 8]).unwrap();
    run(&ab, &mut req_ab);

    let mut req_ba = Request::new(&ba);
    req_ba.set_input(0, f32_bytes(&[3.0, 4.0])).unwrap();
    req_ba.set_input(1, f32_bytes(&[1.0, 2.0])).unwrap();
    req_ba.set_output(0, vec![0u8; 8]).unwrap();
    run(&ba, &mut req_ba);

    assert_eq!(f32_out(&mut req_ab, 0), f32_out(&mut req_ba, 0));
}

#[test]
fn quant8_concatenation_on_axis_1() {
    let quant = QuantParams::new(0.5, 0);
    let mut b = ModelBuilder::new();
    let left = b.add_quant8_operand(Shape::new(vec![2, 3]), quant.scale, quant.zero_point).unwrap();
    let right = b.add_quant8_operand(Shape::new(vec![2, 3]), quant.scale, quant.zero_point).unwrap();
    let axis = b.add_operand(ElementType::I32, Shape::scalar()).unwrap();
    let out = b.add_quant8_operand(Shape::new(vec![2, 6]), quant.scale, quant.zero_point).unwrap();
    b.set_operand_value(axis, &1i32.to_ne_bytes()).unwrap();
    b.add_operation(OpKind::Concatenation, vec![left, right, axis], vec![out]).unwrap();
    b.identify_inputs_and_outputs(vec![left, right], vec![out]).unwrap();
    let model = b.finish().unwrap();

    let mut request = Request::new(&model);
    request.set_input(0, vec![1, 2, 3, 4, 5, 6]).unwrap();
    request.set_input(1, vec![10, 20, 30, 40, 50, 60]).unwrap();
    request.set_output(0, vec![0u8; 12]).unwrap();
    run(&model, &mut request);

    assert_eq!(
        request.output_bytes_mut(0).unwrap(),
        &[1, 2, 3, 10, 20, 30, 4, 5, 6, 40, 50, 60]
    );
}

#[test]
fn quant8_concatenation_rejects_mismatched_scale() {
    let mut b = ModelBuilder::new();
    let left = b.add_quant8_operand(Shape::new(vec![2, 3]), 0.5, 0).unwrap();
    let right = b.add_quant8_operand(Shape::new(vec![2, 3]), 0.25, 0).unwrap();
    let axis = b.add_operand(ElementType::I32, Shape::scalar()).unwrap();
    let out = b.add_quant8_operand(Shape::new(vec![2, 6]), 0.5, 0).unwrap();
    b.set_operand_value(axis, &1i32.to_ne_bytes()).unwrap();
    b.add_operation(OpKind::Concatenation, vec![left, right, axis], vec![out]).unwrap();
    b.identify_inputs_and_outputs(vec![left, right], vec![out]).unwrap();
    let model = b.finish().unwrap();

    let mut request = Request::new(&model);
    request.set_input(0, vec![1, 2, 3, 4, 5, 6]).unwrap();
    request.set_input(1, vec![10, 20, 30, 40, 50, 60]).unwrap();
    request.set_output(0, vec![0u8; 12]).unwrap();
    request.start_compute().expect("start_compute");
    let mut diagnostics = Diagnostics::default();
    let err = CpuExecutor::run(&model, &mut request, &mut diagnostics).unwrap_err();
    assert_eq!(err.kind, tensorplan::error::ErrorKind::BadData);
}

#[test]
fn embedding_lookup_gathers_rows_in_order() {
    let mut b = ModelBuilder::new();
    let lookups = b.add_operand(ElementType::TensorI32, Shape::new(vec![3])).unwrap();
    let values = b.add_operand(ElementType::TensorF32, Shape::new(vec![3, 2, 4])).unwrap();
    let out = b.add_operand(ElementType::TensorF32, Shape::new(vec![3, 2, 4])).unwrap();
    b.add_operation(OpKind::EmbeddingLookup, vec![lookups, values], vec![out]).unwrap();
    b.identify_inputs_and_outputs(vec![lookups, values], vec![out]).unwrap();
    let model = b.finish().unwrap();

    let mut rows = vec![0.0f32; 3 * 2 * 4];
    for i in 0..3 {
        for j in 0..2 {
            for k in 0..4 {
                rows[(i * 2 + j) * 4 + k] = i as f32 + j as f32 / 10.0 + k as f32 / 100.0;
            }
        }
    }

    let mut request = Request::new(&model);
    request.set_input(0, bytemuck::cast_slice(&[1i32, 0, 2]).to_vec()).unwrap();
    request.set_input(1, f32_bytes(&rows)).unwrap();
    request.set_output(0, vec![0u8; 3 * 2 * 4 * 4]).unwrap();
    run(&model, &mut request);

    let expected: Vec<f32> = [1usize, 0, 2]
        .iter()
        .flat_map(|&row| rows[row * 8..row * 8 + 8].to_vec())
        .collect();
    assert_eq!(f32_out(&mut request, 0), expected);
}

#[test]
fn hashtable_lookup_reports_miss_and_hit() {
    let mut b = ModelBuilder::new();
    let lookups = b.add_operand(ElementType::TensorI32, Shape::new(vec![2])).unwrap();
    let keys = b.add_operand(ElementType::TensorI32, Shape::new(vec![2])).unwrap();
    let values = b.add_operand(ElementType::TensorF32, Shape::new(vec![2, 2])).unwrap();
    let out_values = b.add_operand(ElementType::TensorF32, Shape::new(vec![2, 2])).unwrap();
    let out_hits = b.add_operand(ElementType::TensorI32, Shape::new(vec![2])).unwrap();
    b.add_operation(OpKind::HashtableLookup, vec![lookups, keys, values], vec![out_values, out_hits])
        .unwrap();
    b.identify_inputs_and_outputs(vec![lookups, keys, values], vec![out_values, out_hits])
        .unwrap();
    let model = b.finish().unwrap();

    let mut request = Request::new(&model);
    request.set_input(0, bytemuck::cast_slice(&[0i32, 2]).to_vec()).unwrap();
    request.set_input(1, bytemuck::cast_slice(&[1i32, 2]).to_vec()).unwrap();
    request.set_input(2, f32_bytes(&[10.0, 11.0, 20.0, 21.0])).unwrap();
    request.set_output(0, vec![0u8; 16]).unwrap();
    request.set_output(1, vec![0u8; 8]).unwrap();
    run(&model, &mut request);

    assert_eq!(f32_out(&mut request, 0), vec![0.0, 0.0, 20.0, 21.0]);
    assert_eq!(request.output_bytes_mut(1).unwrap(), &[0, 0, 0, 0, 1, 0, 0, 0]);
}

#[test]
fn logistic_on_quant8_matches_sigmoid_within_one_step() {
    let in_quant = QuantParams::new(1.0 / 127.0, 0);
    let out_quant = QuantParams::new(1.0 / 256.0, 0);
    let mut b = ModelBuilder::new();
    let input = b.add_quant8_operand(Shape::new(vec![1, 2, 2, 1]), in_quant.scale, in_quant.zero_point).unwrap();
    let out = b.add_quant8_operand(Shape::new(vec![1, 2, 2, 1]), out_quant.scale, out_quant.zero_point).unwrap();
    b.add_operation(OpKind::Logistic, vec![input], vec![out]).unwrap();
    b.identify_inputs_and_outputs(vec![input], vec![out]).unwrap();
    let model = b.finish().unwrap();

    let stored: Vec<u8> = vec![0, 32, 95, 127];
    let mut request = Request::new(&model);
    request.set_input(0, stored.clone()).unwrap();
    request.set_output(0, vec![0u8; 4]).unwrap();
    run(&model, &mut request);

    let produced = request.output_bytes_mut(0).unwrap().to_vec();
    for (&s, &p) in stored.iter().zip(produced.iter()) {
        let real = in_quant.dequantize(s);
        let expected_sigmoid = 1.0 / (1.0 + (-real).exp());
        let reference = out_quant.quantize(expected_sigmoid);
        assert!((p as i32 - reference as i32).abs() <= 1, "within one quantization step");
    }
}

/// Runs its assigned sub-model through the CPU executor, the same way a
/// real accelerator driver would run it through its own kernels instead.
struct OnlyKindPreparedModel(Model);

impl PreparedModel for OnlyKindPreparedModel {
    fn execute(&self, request: &mut Request, completer: Completer) {
        let mut diagnostics = Diagnostics::default();
        let outcome = CpuExecutor::run(&self.0, request, &mut diagnostics);
        completer.signal(outcome.map_err(|e| e.kind));
    }
}

struct OnlyKind(OpKind, Capabilities);

impl Driver for OnlyKind {
    fn name(&self) -> &str {
        "only-kind"
    }
    fn capabilities(&self) -> Capabilities {
        self.1
    }
    fn status(&self) -> Status {
        Status::Available
    }
    fn supported_operations(&self, model: &Model) -> Vec<bool> {
        model.operations().iter().map(|op| op.kind == self.0).collect()
    }
    fn prepare_model(&self, model: &Model) -> tensorplan::Result<Box<dyn PreparedModel>> {
        Ok(Box::new(OnlyKindPreparedModel(model.clone())))
    }
}

#[test]
fn two_driver_partition_matches_single_driver_reference() {
    let build = || {
        let mut b = ModelBuilder::new();
        let a = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let c = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let sum = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let scale = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let product = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        b.add_operation(OpKind::Add, vec![a, c], vec![sum]).unwrap();
        b.add_operation(OpKind::Mul, vec![sum, scale], vec![product]).unwrap();
        b.identify_inputs_and_outputs(vec![a, c, scale], vec![product]).unwrap();
        b.finish().unwrap()
    };

    let model = build();
    let drivers: Vec<Box<dyn Driver>> = vec![
        Box::new(OnlyKind(OpKind::Add, Capabilities::uniform(0.1, 0.1))),
        Box::new(OnlyKind(OpKind::Mul, Capabilities::uniform(0.1, 0.1))),
    ];
    let execution_plan = plan(&model, &drivers, Preference::FastSingleAnswer);

    assert_eq!(execution_plan.steps.len(), 2);
    assert_eq!(execution_plan.steps[0].device, Some(0));
    assert_eq!(execution_plan.steps[1].device, Some(1));
    // The intermediate (a+b) is surfaced as a step-1 output consumed by step 2,
    // alongside step 2's own direct model input (the scale operand).
    for produced in &execution_plan.steps[0].outputs {
        assert!(execution_plan.steps[1].inputs.contains(produced));
    }

    let reference_model = build();
    let mut request = Request::new(&reference_model);
    request.set_input(0, f32_bytes(&[1.0, 2.0])).unwrap();
    request.set_input(1, f32_bytes(&[3.0, 4.0])).unwrap();
    request.set_input(2, f32_bytes(&[2.0, 2.0])).unwrap();
    request.set_output(0, vec![0u8; 8]).unwrap();
    run(&reference_model, &mut request);

    assert_eq!(f32_out(&mut request, 0), vec![8.0, 12.0]);

    // The same plan, actually dispatched across both drivers, agrees with
    // the single-pass CPU reference above.
    let dispatched_model = build();
    let mut dispatched_request = Request::new(&dispatched_model);
    dispatched_request.set_input(0, f32_bytes(&[1.0, 2.0])).unwrap();
    dispatched_request.set_input(1, f32_bytes(&[3.0, 4.0])).unwrap();
    dispatched_request.set_input(2, f32_bytes(&[2.0, 2.0])).unwrap();
    dispatched_request.set_output(0, vec![0u8; 8]).unwrap();
    dispatched_request.start_compute().unwrap();

    let mut diagnostics = Diagnostics::default();
    let event = dispatch::execute(
        &dispatched_model,
        &execution_plan,
        &mut dispatched_request,
        &drivers,
        &mut diagnostics,
    );
    event.wait().expect("dispatch should succeed");
    assert_eq!(f32_out(&mut dispatched_request, 0), vec![8.0, 12.0]);
}

#[test]
fn finalization_is_idempotent_on_run_order() {
    let mut b = ModelBuilder::new();
    let a = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    let out = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    b.add_operation(OpKind::Relu, vec![a], vec![out]).unwrap();
    b.identify_inputs_and_outputs(vec![a], vec![out]).unwrap();
    let model = b.finish().unwrap();
    let first_order: Vec<_> = model.operations().iter().map(|op| op.kind).collect();
    assert_eq!(first_order, vec![OpKind::Relu]);
}
