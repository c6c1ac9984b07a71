//! Builds the smallest possible graph — one ADD over two length-4 float
//! vectors — binds concrete buffers, and runs it on the built-in CPU
//! executor.

use tensorplan::diag::Diagnostics;
use tensorplan::executor::CpuExecutor;
use tensorplan::request::Request;
use tensorplan::types::{ElementType, Shape};
use tensorplan::{ModelBuilder, OpKind};

fn main() {
    let mut builder = ModelBuilder::new();
    let a = builder.add_operand(ElementType::TensorF32, Shape::new(vec![4])).unwrap();
    let b = builder.add_operand(ElementType::TensorF32, Shape::new(vec![4])).unwrap();
    let sum = builder.add_operand(ElementType::TensorF32, Shape::new(vec![4])).unwrap();
    builder.add_operation(OpKind::Add, vec![a, b], vec![sum]).unwrap();
    builder.identify_inputs_and_outputs(vec![a, b], vec![sum]).unwrap();
    let model = builder.finish().unwrap();

    let mut request = Request::new(&model);
    request.set_input(0, bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]).to_vec()).unwrap();
    request.set_input(1, bytemuck::cast_slice(&[10.0f32, 20.0, 30.0, 40.0]).to_vec()).unwrap();
    request.set_output(0, vec![0u8; 16]).unwrap();
    request.start_compute().expect("request validation failed");

    let mut diagnostics = Diagnostics::default();
    CpuExecutor::run(&model, &mut request, &mut diagnostics).expect("execution failed");

    let result: &[f32] = bytemuck::cast_slice(request.output_bytes_mut(0).unwrap());
    println!("sum = {result:?}");
    println!("{}", diagnostics.render());
}
