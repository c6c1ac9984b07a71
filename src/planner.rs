//! Partitioner/Planner (spec §4.E), grounded on
//! `original_source/nn/runtime/ExecutionPlan.cpp`:
//! `findBestDeviceForEachOperation` scores each operation against every
//! driver that claims to support it (falling back to the CPU executor),
//! then `partitionTheWork` forms steps the way `OperandTracker` and its
//! per-device queues do: an operation becomes ready once every input
//! that some other operation produces has been produced, ready
//! operations queue onto their assigned device, and steps are formed by
//! draining one device's queue to exhaustion (including operations that
//! become ready mid-drain) before moving to the next. Devices are
//! drained in reverse registration order with the CPU slot first, so
//! the CPU preferentially runs the upstream prefix that prepares inputs
//! for specialized drivers.
//!
//! Completes the original's sub-model input/output discovery: each step
//! now also records which operands it needs from earlier steps and which
//! of its outputs later steps (or the model) still need, instead of
//! leaving that walk as a follow-up.

use std::collections::{HashSet, VecDeque};

use crate::driver::Driver;
use crate::model::Model;
use crate::types::ElementType;

/// How the planner should weigh a driver's advertised performance figures
/// against the CPU fallback (spec §4.E).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Preference {
    LowPower,
    #[default]
    FastSingleAnswer,
    SustainedSpeed,
}

/// A CPU baseline used when no registered driver claims an operation, or
/// when every claimant scores worse than just running it locally.
const CPU_BASELINE: crate::driver::PerformanceInfo = crate::driver::PerformanceInfo {
    exec_time: 1.0,
    power_usage: 1.0,
};

fn score(preference: Preference, perf: crate::driver::PerformanceInfo) -> f32 {
    match preference {
        Preference::LowPower => perf.power_usage,
        Preference::FastSingleAnswer | Preference::SustainedSpeed => perf.exec_time,
    }
}

/// One contiguous run of operations assigned to the same device.
#[derive(Debug)]
pub struct Step {
    /// `None` selects the built-in CPU executor.
    pub device: Option<usize>,
    /// Indices into the model's (already run-ordered) operation list.
    pub operations: Vec<usize>,
    /// Operands this step reads that it did not itself produce.
    pub inputs: Vec<u32>,
    /// Operands this step produces that something outside the step still
    /// needs (a later step, or a model output).
    pub outputs: Vec<u32>,
}

/// The full per-operation device assignment plus grouped steps.
#[derive(Debug)]
pub struct Plan {
    pub device_for_operation: Vec<Option<usize>>,
    pub steps: Vec<Step>,
}

/// Which of a driver's three tracked performance classes an operation
/// falls into, keyed off its first output (spec §4.D: performance is
/// tracked per element class, and an operation's output type is what
/// determines which class it belongs to).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OperandClass {
    Float32,
    Quant8,
    Scalar,
}

fn operation_class(model: &Model, operation: &crate::operand::Operation) -> OperandClass {
    operation
        .outputs
        .first()
        .and_then(|&idx| model.operand(idx).ok())
        .map(|operand| match operand.element_type {
            ElementType::F32 | ElementType::TensorF32 => OperandClass::Float32,
            ElementType::TensorQuant8Asymm => OperandClass::Quant8,
            ElementType::I32 | ElementType::U32 | ElementType::TensorI32 => OperandClass::Scalar,
            // OEM operand types carry no class of their own; fall back to
            // quant8 the way the original's getPerformanceInfo does.
            ElementType::Oem(_) => OperandClass::Quant8,
        })
        .unwrap_or(OperandClass::Float32)
}

/// `findBestDeviceForEachOperation`: for every operation, pick whichever
/// driver both supports it and scores best, or `None` for the CPU
/// fallback when no driver beats it.
pub fn find_best_device_for_each_operation(
    model: &Model,
    drivers: &[Box<dyn Driver>],
    preference: Preference,
) -> Vec<Option<usize>> {
    let support: Vec<Vec<bool>> = drivers.iter().map(|d| d.supported_operations(model)).collect();

    (0..model.operations().len())
        .map(|op_idx| {
            let operation = model.operation(op_idx).unwrap();
            let class = operation_class(model, operation);
            let mut best: Option<usize> = None;
            let mut best_score = score(preference, CPU_BASELINE);
            for (driver_idx, driver) in drivers.iter().enumerate() {
                if !support[driver_idx].get(op_idx).copied().unwrap_or(false) {
                    continue;
                }
                let caps = driver.capabilities();
                let perf = match class {
                    OperandClass::Float32 => caps.float32,
                    OperandClass::Quant8 => caps.quant8,
                    OperandClass::Scalar => caps.scalar,
                };
                let driver_score = score(preference, perf);
                if driver_score < best_score {
                    best_score = driver_score;
                    best = Some(driver_idx);
                }
            }
            best
        })
        .collect()
}

/// `partitionTheWork`: form maximal same-device steps by draining
/// per-device readiness queues (`OperandTracker` equivalent), then fill
/// in each step's cross-step input/output operand lists.
pub fn partition_the_work(
    model: &Model,
    device_for_operation: &[Option<usize>],
    num_drivers: usize,
) -> Plan {
    let operations = model.operations();
    let operation_count = operations.len();

    // Dense device-slot space: 0..num_drivers are drivers in registration
    // order, num_drivers is the CPU slot (treated as "last" for draining).
    let slot_count = num_drivers + 1;
    let device_slot = |device: Option<usize>| device.unwrap_or(num_drivers);

    // producer_of[operand] = the operation that writes it, if any (model
    // inputs and constants have no producer and start out ready).
    let mut producer_of: Vec<Option<usize>> = vec![None; model.operands().len()];
    for (op_idx, operation) in operations.iter().enumerate() {
        for &out in &operation.outputs {
            producer_of[out as usize] = Some(op_idx);
        }
    }

    // unknown_input_count[op] = number of op's inputs with a producer that
    // hasn't run yet; waiting_on[operand] = operations blocked on it.
    let mut unknown_input_count = vec![0usize; operation_count];
    let mut waiting_on: Vec<Vec<usize>> = vec![Vec::new(); model.operands().len()];
    for (op_idx, operation) in operations.iter().enumerate() {
        for &input in &operation.inputs {
            if producer_of[input as usize].is_some() {
                unknown_input_count[op_idx] += 1;
                waiting_on[input as usize].push(op_idx);
            }
        }
    }

    let mut queues: Vec<VecDeque<usize>> = vec![VecDeque::new(); slot_count];
    for (op_idx, &count) in unknown_input_count.iter().enumerate() {
        if count == 0 {
            queues[device_slot(device_for_operation[op_idx])].push_back(op_idx);
        }
    }

    let mut steps: Vec<Step> = Vec::new();
    loop {
        let next_slot = (0..slot_count).rev().find(|&slot| !queues[slot].is_empty());
        let Some(slot) = next_slot else {
            break;
        };
        let device = (slot != num_drivers).then_some(slot);
        let mut step_operations = Vec::new();
        while let Some(op_idx) = queues[slot].pop_front() {
            step_operations.push(op_idx);
            for &out in &operations[op_idx].outputs {
                for &waiting_op in &waiting_on[out as usize] {
                    unknown_input_count[waiting_op] -= 1;
                    if unknown_input_count[waiting_op] == 0 {
                        queues[device_slot(device_for_operation[waiting_op])].push_back(waiting_op);
                    }
                }
            }
        }
        steps.push(Step {
            device,
            operations: step_operations,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
    }

    // producer_step[operand] = which step produces it, if any operation does.
    let mut producer_step = vec![None; model.operands().len()];
    for (step_idx, step) in steps.iter().enumerate() {
        for &op_idx in &step.operations {
            for &out in &model.operation(op_idx).unwrap().outputs {
                producer_step[out as usize] = Some(step_idx);
            }
        }
    }

    let model_outputs: HashSet<u32> = model.output_indices().iter().copied().collect();

    for step_idx in 0..steps.len() {
        let mut inputs = HashSet::new();
        let mut produced_here = HashSet::new();
        for &op_idx in &steps[step_idx].operations {
            let operation = model.operation(op_idx).unwrap();
            for &input in &operation.inputs {
                if producer_step[input as usize] != Some(step_idx) {
                    inputs.insert(input);
                }
            }
            produced_here.extend(operation.outputs.iter().copied());
        }
        steps[step_idx].inputs = inputs.into_iter().collect();
        steps[step_idx].inputs.sort_unstable();

        let mut outputs = Vec::new();
        for &produced in &produced_here {
            let needed_later = steps[step_idx + 1..].iter().any(|later| {
                later
                    .operations
                    .iter()
                    .any(|&op_idx| model.operation(op_idx).unwrap().inputs.contains(&produced))
            });
            if needed_later || model_outputs.contains(&produced) {
                outputs.push(produced);
            }
        }
        outputs.sort_unstable();
        steps[step_idx].outputs = outputs;
    }

    Plan {
        device_for_operation: device_for_operation.to_vec(),
        steps,
    }
}

/// Build a [`Plan`] end to end (spec §4.E).
pub fn plan(model: &Model, drivers: &[Box<dyn Driver>], preference: Preference) -> Plan {
    let device_for_operation = find_best_device_for_each_operation(model, drivers, preference);
    partition_the_work(model, &device_for_operation, drivers.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Capabilities, PreparedModel, Status};
    use crate::error::Result;
    use crate::model::ModelBuilder;
    use crate::operand::OpKind;
    use crate::types::{ElementType, Shape};

    struct OnlyAdd;
    impl Driver for OnlyAdd {
        fn name(&self) -> &str {
            "only-add"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::uniform(0.1, 0.1)
        }
        fn status(&self) -> Status {
            Status::Available
        }
        fn supported_operations(&self, model: &Model) -> Vec<bool> {
            model
                .operations()
                .iter()
                .map(|op| op.kind == OpKind::Add)
                .collect()
        }
        fn prepare_model(&self, _model: &Model) -> Result<Box<dyn PreparedModel>> {
            unimplemented!("not exercised by this test")
        }

    }

    struct OnlyRelu;
    impl Driver for OnlyRelu {
        fn name(&self) -> &str {
            "only-relu"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::uniform(0.1, 0.1)
        }
        fn status(&self) -> Status {
            Status::Available
        }
        fn supported_operations(&self, model: &Model) -> Vec<bool> {
            model
                .operations()
                .iter()
                .map(|op| op.kind == OpKind::Relu)
                .collect()
        }
        fn prepare_model(&self, _model: &Model) -> Result<Box<dyn PreparedModel>> {
            unimplemented!("not exercised by this test")
        }
    }

    fn build_add_then_relu() -> Model {
        let mut b = ModelBuilder::new();
        let a = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let c = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let sum = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let out = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        b.add_operation(OpKind::Add, vec![a, c], vec![sum]).unwrap();
        b.add_operation(OpKind::Relu, vec![sum], vec![out]).unwrap();
        b.identify_inputs_and_outputs(vec![a, c], vec![out]).unwrap();
        b.finish().unwrap()
    }

    #[test]
    fn add_routes_to_driver_relu_falls_back_to_cpu() {
        let model = build_add_then_relu();
        let drivers: Vec<Box<dyn Driver>> = vec![Box::new(OnlyAdd)];
        let assignment =
            find_best_device_for_each_operation(&model, &drivers, Preference::FastSingleAnswer);
        assert_eq!(assignment, vec![Some(0), None]);
    }

    #[test]
    fn two_device_plan_produces_two_steps_with_shared_operand_as_boundary() {
        let model = build_add_then_relu();
        let drivers: Vec<Box<dyn Driver>> = vec![Box::new(OnlyAdd)];
        let p = plan(&model, &drivers, Preference::FastSingleAnswer);
        assert_eq!(p.steps.len(), 2);
        assert_eq!(p.steps[0].device, Some(0));
        assert_eq!(p.steps[1].device, None);
        assert_eq!(p.steps[0].outputs, p.steps[1].inputs);
    }

    /// Two independent CPU-bound adds are separated by a driver-routed
    /// Relu in model-insertion order, with the second add depending on
    /// the first's output. A scan that only merges operations already
    /// adjacent in run order would split this into three steps; the
    /// readiness queue reunites the two CPU adds into one step because
    /// the second becomes ready while the CPU queue is still draining.
    #[test]
    fn readiness_queue_merges_non_adjacent_same_device_operations() {
        let mut b = ModelBuilder::new();
        let a = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let bb = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let c = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let d = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let x = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let y = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        let z = b.add_operand(ElementType::TensorF32, Shape::new(vec![2])).unwrap();
        b.add_operation(OpKind::Add, vec![a, bb], vec![x]).unwrap();
        b.add_operation(OpKind::Relu, vec![c], vec![y]).unwrap();
        b.add_operation(OpKind::Add, vec![x, d], vec![z]).unwrap();
        b.identify_inputs_and_outputs(vec![a, bb, c, d], vec![y, z]).unwrap();
        let model = b.finish().unwrap();

        let drivers: Vec<Box<dyn Driver>> = vec![Box::new(OnlyRelu)];
        let p = plan(&model, &drivers, Preference::FastSingleAnswer);

        assert_eq!(p.steps.len(), 2);
        let cpu_step = p.steps.iter().find(|s| s.device.is_none()).unwrap();
        let driver_step = p.steps.iter().find(|s| s.device == Some(0)).unwrap();
        assert_eq!(cpu_step.operations.len(), 2);
        assert_eq!(driver_step.operations.len(), 1);
    }

    #[test]
    fn no_drivers_is_a_single_cpu_step() {
        let model = build_add_then_relu();
        let drivers: Vec<Box<dyn Driver>> = Vec::new();
        let p = plan(&model, &drivers, Preference::FastSingleAnswer);
        assert_eq!(p.steps.len(), 1);
        assert_eq!(p.steps[0].device, None);
        assert_eq!(p.steps[0].operations.len(), 2);
    }
}
