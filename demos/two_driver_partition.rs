//! Registers two toy drivers — one that only claims ADD, one that only
//! claims MUL — builds a graph that needs both plus a CPU-only RELU, and
//! shows the planner splitting it into steps the dispatcher then actually
//! runs: the ADD/MUL steps go through their driver, RELU falls back to
//! the CPU executor inline.

use tensorplan::diag::Diagnostics;
use tensorplan::dispatch;
use tensorplan::driver::{Capabilities, Driver, PreparedModel, Status};
use tensorplan::event::Completer;
use tensorplan::executor::CpuExecutor;
use tensorplan::model::Model;
use tensorplan::planner::{plan, Preference};
use tensorplan::request::Request;
use tensorplan::types::{ElementType, Shape};
use tensorplan::{ModelBuilder, OpKind, Result};

/// A stand-in for a real accelerator's compiled artifact: it owns a copy
/// of the sub-model the planner carved out for it and runs it through the
/// CPU executor, same as a real driver would run it through its own
/// kernels.
struct ToyPreparedModel {
    model: Model,
}

impl PreparedModel for ToyPreparedModel {
    fn execute(&self, request: &mut Request, completer: Completer) {
        let mut diagnostics = Diagnostics::default();
        let outcome = CpuExecutor::run(&self.model, request, &mut diagnostics);
        completer.signal(outcome.map_err(|e| e.kind));
    }
}

struct AddDriver;

impl Driver for AddDriver {
    fn name(&self) -> &str {
        "toy-add-accelerator"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::uniform(0.2, 0.5)
    }
    fn status(&self) -> Status {
        Status::Available
    }
    fn supported_operations(&self, model: &Model) -> Vec<bool> {
        model.operations().iter().map(|op| op.kind == OpKind::Add).collect()
    }
    fn prepare_model(&self, model: &Model) -> Result<Box<dyn PreparedModel>> {
        Ok(Box::new(ToyPreparedModel { model: model.clone() }))
    }
}

struct MulDriver;

impl Driver for MulDriver {
    fn name(&self) -> &str {
        "toy-mul-accelerator"
    }
    fn capabilities(&self) -> Capabilities {
        Capabilities::uniform(0.3, 0.3)
    }
    fn status(&self) -> Status {
        Status::Available
    }
    fn supported_operations(&self, model: &Model) -> Vec<bool> {
        model.operations().iter().map(|op| op.kind == OpKind::Mul).collect()
    }
    fn prepare_model(&self, model: &Model) -> Result<Box<dyn PreparedModel>> {
        Ok(Box::new(ToyPreparedModel { model: model.clone() }))
    }
}

fn main() {
    let mut builder = ModelBuilder::new();
    let a = builder.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    let b = builder.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    let sum = builder.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    let activated = builder.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    let scale = builder.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
    let product = builder.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();

    builder.add_operation(OpKind::Add, vec![a, b], vec![sum]).unwrap();
    builder.add_operation(OpKind::Relu, vec![sum], vec![activated]).unwrap();
    builder.add_operation(OpKind::Mul, vec![activated, scale], vec![product]).unwrap();
    builder
        .identify_inputs_and_outputs(vec![a, b, scale], vec![product])
        .unwrap();
    let model = builder.finish().unwrap();

    let drivers: Vec<Box<dyn Driver>> = vec![Box::new(AddDriver), Box::new(MulDriver)];
    let execution_plan = plan(&model, &drivers, Preference::FastSingleAnswer);

    for (i, step) in execution_plan.steps.iter().enumerate() {
        let device = step
            .device
            .map(|d| drivers[d].name().to_string())
            .unwrap_or_else(|| "cpu".to_string());
        println!(
            "step {i}: device={device} operations={:?} inputs={:?} outputs={:?}",
            step.operations, step.inputs, step.outputs
        );
    }

    let mut request = Request::new(&model);
    request.set_input(0, bytemuck::cast_slice(&[1.0f32, -2.0]).to_vec()).unwrap();
    request.set_input(1, bytemuck::cast_slice(&[3.0f32, 1.0]).to_vec()).unwrap();
    request.set_input(2, bytemuck::cast_slice(&[2.0f32, 2.0]).to_vec()).unwrap();
    request.set_output(0, vec![0u8; 8]).unwrap();
    request.start_compute().expect("request validation failed");

    let mut diagnostics = Diagnostics::default();
    let event = dispatch::execute(&model, &execution_plan, &mut request, &drivers, &mut diagnostics);
    event.wait().expect("execution failed");
    println!("{}", diagnostics.render());

    let result: &[f32] = bytemuck::cast_slice(request.output_bytes_mut(0).unwrap());
    println!("product = {result:?}");
}
