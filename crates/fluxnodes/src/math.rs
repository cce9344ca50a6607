//! Arithmetic nodes derived from plain functions.

use fluxruntime::NodeFactory;

pub fn add(a: f64, b: f64) -> f64 {
    a + b
}

pub fn subtract(a: f64, b: f64) -> f64 {
    a - b
}

pub fn multiply(a: f64, b: f64) -> f64 {
    a * b
}

pub fn divide(a: f64, b: f64) -> f64 {
    a / b
}

pub fn negate(a: f64) -> f64 {
    -a
}

pub fn register_math(factory: &NodeFactory) {
    factory.register_function("Math", "Add", add);
    factory.register_function("Math", "Subtract", subtract);
    factory.register_function("Math", "Multiply", multiply);
    factory.register_function("Math", "Divide", divide);
    factory.register_function("Math", "Negate", negate);
}
