//! Plan dispatch (spec §4.F steps 4-6, §4.H), grounded on
//! `original_source/nn/runtime/ExecutionPlan.cpp`'s `next`/`execute` step
//! loop: walk a [`Plan`]'s steps in order, running each CPU step inline
//! and handing each driver step to `PreparedModel::execute`, then signal
//! the returned [`Event`] once every step has completed.
//!
//! One [`RunTimeOperandInfo`] table is carried across every step so a
//! value a CPU step produces is there for a later driver step to read,
//! and vice versa. A driver step gets its own self-contained sub-[`Model`]
//! and sub-[`Request`] — built from [`Step::inputs`]/[`Step::outputs`] —
//! so the driver only ever sees its own pool-backed view of the operands
//! it was assigned (spec §4.E: "identical views chosen by the planner"),
//! never the caller's original buffers.

use crate::diag::Diagnostics;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::event::{event_pair, Event};
use crate::executor::{CpuExecutor, RunTimeOperandInfo};
use crate::model::Model;
use crate::planner::{Plan, Step};
use crate::request::Request;

/// Dispatch `plan` against `request`, routing each step to the CPU
/// executor or to whichever driver the planner assigned it, and return an
/// [`Event`] the caller can wait on for the outcome.
pub fn execute(
    model: &Model,
    plan: &Plan,
    request: &mut Request,
    drivers: &[Box<dyn Driver>],
    diagnostics: &mut Diagnostics,
) -> Event {
    let (event, completer) = event_pair();
    let outcome = run_plan(model, plan, request, drivers, diagnostics);
    completer.signal(outcome.map_err(|e| e.kind));
    event
}

fn run_plan(
    model: &Model,
    plan: &Plan,
    request: &mut Request,
    drivers: &[Box<dyn Driver>],
    diagnostics: &mut Diagnostics,
) -> Result<()> {
    let mut infos = CpuExecutor::initialize_runtime_info(model, request)?;

    for (step_idx, step) in plan.steps.iter().enumerate() {
        match step.device {
            None => {
                diagnostics.record(format!("dispatch: step {step_idx} on cpu"));
                run_cpu_step(model, step, &mut infos)?;
            }
            Some(driver_idx) => {
                let driver = drivers
                    .get(driver_idx)
                    .ok_or_else(|| Error::bad_data("plan references an unknown driver"))?;
                diagnostics.record(format!(
                    "dispatch: step {step_idx} on driver {}",
                    driver.name()
                ));
                run_driver_step(model, step, &mut infos, driver.as_ref())?;
            }
        }
    }

    CpuExecutor::write_back_outputs(model, request, &infos)?;
    request.copy_pointer_outputs_back()
}

fn run_cpu_step(model: &Model, step: &Step, infos: &mut [RunTimeOperandInfo]) -> Result<()> {
    for &op_idx in &step.operations {
        let operation = model.operation(op_idx)?;
        CpuExecutor::execute_operation(operation, infos)?;
        CpuExecutor::free_no_longer_used_operands(operation, infos);
    }
    Ok(())
}

/// Build the sub-model a driver step's `prepare_model` compiles against:
/// the same operand table (so operand indices keep meaning) trimmed to
/// just this step's operations, with `Step::inputs`/`Step::outputs` as
/// its declared model inputs/outputs.
fn build_sub_model(model: &Model, step: &Step) -> Result<Model> {
    let operations = step
        .operations
        .iter()
        .map(|&idx| model.operation(idx).cloned())
        .collect::<Result<Vec<_>>>()?;
    Ok(Model {
        operands: model.operands().to_vec(),
        operations,
        constants: model.constants().to_vec(),
        pools: model.pools().clone(),
        input_indices: step.inputs.clone(),
        output_indices: step.outputs.clone(),
        finalized: true,
    })
}

fn run_driver_step(
    model: &Model,
    step: &Step,
    infos: &mut [RunTimeOperandInfo],
    driver: &dyn Driver,
) -> Result<()> {
    let sub_model = build_sub_model(model, step)?;
    let prepared = driver.prepare_model(&sub_model)?;

    let mut sub_request = Request::new(&sub_model);
    for (position, &operand_idx) in step.inputs.iter().enumerate() {
        let bytes = infos[operand_idx as usize]
            .buffer
            .clone()
            .ok_or_else(|| Error::bad_data(format!("operand {operand_idx} has no value at this point")))?;
        sub_request.set_input(position, bytes)?;
    }
    for (position, &operand_idx) in step.outputs.iter().enumerate() {
        let byte_len = sub_model.operand(operand_idx)?.byte_size();
        sub_request.set_output(position, vec![0u8; byte_len as usize])?;
    }
    sub_request.start_compute()?;

    let (event, completer) = event_pair();
    prepared.execute(&mut sub_request, completer);
    event.wait()?;

    for (position, &operand_idx) in step.outputs.iter().enumerate() {
        let bytes = sub_request.output_bytes_mut(position)?.to_vec();
        infos[operand_idx as usize].buffer = Some(bytes);
    }

    for &op_idx in &step.operations {
        let operation = model.operation(op_idx)?;
        CpuExecutor::free_no_longer_used_operands(operation, infos);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Diagnostics;
    use crate::driver::{Capabilities, PreparedModel, Status};
    use crate::event::Completer;
    use crate::model::ModelBuilder;
    use crate::operand::OpKind;
    use crate::planner::{plan, Preference};
    use crate::types::{ElementType, Shape};

    struct CpuBackedPreparedModel {
        model: Model,
    }

    impl PreparedModel for CpuBackedPreparedModel {
        fn execute(&self, request: &mut Request, completer: Completer) {
            let mut diagnostics = Diagnostics::default();
            let outcome = CpuExecutor::run(&self.model, request, &mut diagnostics);
            completer.signal(outcome.map_err(|e| e.kind));
        }
    }

    struct OnlyKind(OpKind);

    impl Driver for OnlyKind {
        fn name(&self) -> &str {
            "only-kind"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::uniform(0.1, 0.1)
        }
        fn status(&self) -> Status {
            Status::Available
        }
        fn supported_operations(&self, model: &Model) -> Vec<bool> {
            model.operations().iter().map(|op| op.kind == self.0).collect()
        }
        fn prepare_model(&self, model: &Model) -> Result<Box<dyn PreparedModel>> {
            Ok(Box::new(CpuBackedPreparedModel { model: model.clone() }))
        }
    }

    fn build_add_relu_mul() -> Model {
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
    }

    #[test]
    fn two_driver_plan_dispatches_and_produces_correct_output() {
        let model = build_add_relu_mul();
        let drivers: Vec<Box<dyn Driver>> = vec![
            Box::new(OnlyKind(OpKind::Add)),
            Box::new(OnlyKind(OpKind::Mul)),
        ];
        let execution_plan = plan(&model, &drivers, Preference::FastSingleAnswer);
        assert_eq!(execution_plan.steps.len(), 2);

        let mut request = Request::new(&model);
        request.set_input(0, bytemuck::cast_slice(&[1.0f32, 2.0]).to_vec()).unwrap();
        request.set_input(1, bytemuck::cast_slice(&[3.0f32, 4.0]).to_vec()).unwrap();
        request.set_input(2, bytemuck::cast_slice(&[2.0f32, 2.0]).to_vec()).unwrap();
        request.set_output(0, vec![0u8; 8]).unwrap();
        request.start_compute().unwrap();

        let mut diagnostics = Diagnostics::default();
        let event = execute(&model, &execution_plan, &mut request, &drivers, &mut diagnostics);
        event.wait().unwrap();

        let result: &[f32] = bytemuck::cast_slice(request.output_bytes_mut(0).unwrap());
        assert_eq!(result, &[8.0, 12.0]);
        assert!(diagnostics.lines().iter().any(|l| l.message.contains("driver only-kind")));
    }

    #[test]
    fn no_drivers_runs_entirely_through_the_cpu_step() {
        let model = build_add_relu_mul();
        let drivers: Vec<Box<dyn Driver>> = Vec::new();
        let execution_plan = plan(&model, &drivers, Preference::FastSingleAnswer);
        assert_eq!(execution_plan.steps.len(), 1);

        let mut request = Request::new(&model);
        request.set_input(0, bytemuck::cast_slice(&[1.0f32, 2.0]).to_vec()).unwrap();
        request.set_input(1, bytemuck::cast_slice(&[3.0f32, 4.0]).to_vec()).unwrap();
        request.set_input(2, bytemuck::cast_slice(&[2.0f32, 2.0]).to_vec()).unwrap();
        request.set_output(0, vec![0u8; 8]).unwrap();
        request.start_compute().unwrap();

        let mut diagnostics = Diagnostics::default();
        let event = execute(&model, &execution_plan, &mut request, &drivers, &mut diagnostics);
        event.wait().unwrap();

        let result: &[f32] = bytemuck::cast_slice(request.output_bytes_mut(0).unwrap());
        assert_eq!(result, &[8.0, 12.0]);
    }
}
