//! Calculator toolkit.
//!
//! Provides `add`, `sub`, `mul` and `div` over two numbers `x` and `y`.
//! Integer inputs stay integers; anything else is computed as `f64`.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ConclaveError, Result};
use crate::schema::{ParameterKind, ParameterSchema};
use crate::tool::{Tool, ToolRegistry};

#[derive(Debug, Clone, Copy)]
enum Operation {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operation {
    fn name(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Sub => "sub",
            Operation::Mul => "mul",
            Operation::Div => "div",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Operation::Add => "Add y to x.",
            Operation::Sub => "Subtract y from x.",
            Operation::Mul => "Multiply x by y.",
            Operation::Div => "Divide x by y. Fails when y is zero.",
        }
    }
}

struct ArithmeticTool(Operation);

/// Registry holding the four arithmetic tools.
pub fn calculator_toolkit() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for op in [Operation::Add, Operation::Sub, Operation::Mul, Operation::Div] {
        if let Err(err) = registry.register(ArithmeticTool(op)) {
            unreachable!("calculator tool names are distinct: {err}");
        }
    }
    registry
}

#[async_trait]
impl Tool for ArithmeticTool {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("x", ParameterKind::Number, "The first operand")
            .required("y", ParameterKind::Number, "The second operand")
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let op = self.0;
        let (x, y) = (operand(&input, "x", op)?, operand(&input, "y", op)?);

        if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
            let exact = match op {
                Operation::Add => a.checked_add(b),
                Operation::Sub => a.checked_sub(b),
                Operation::Mul => a.checked_mul(b),
                Operation::Div if b == 0 => return Err(ConclaveError::tool("div", "division by zero")),
                Operation::Div if a.checked_rem(b) == Some(0) => a.checked_div(b),
                Operation::Div => None,
            };
            if let Some(value) = exact {
                return Ok(json!(value));
            }
        }

        let (a, b) = (as_float(&x, op)?, as_float(&y, op)?);
        let value = match op {
            Operation::Add => a + b,
            Operation::Sub => a - b,
            Operation::Mul => a * b,
            Operation::Div if b == 0.0 => return Err(ConclaveError::tool("div", "division by zero")),
            Operation::Div => a / b,
        };
        Ok(json!(value))
    }
}

fn operand(input: &Value, field: &str, op: Operation) -> Result<Value> {
    input
        .get(field)
        .filter(|value| value.is_number())
        .cloned()
        .ok_or_else(|| ConclaveError::InvalidArguments {
            tool: op.name().into(),
            reason: format!("missing numeric `{field}`"),
        })
}

fn as_float(value: &Value, op: Operation) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| ConclaveError::tool(op.name(), format!("{value} is not representable")))
}
