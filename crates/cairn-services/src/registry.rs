//! Function registry.
//!
//! Maps the callable names that appear in `TaskSpec::function` to Rust
//! closures. A compute request can only run what the executing worker has
//! registered; nothing executable crosses the wire.

use std::sync::Arc;

use anyhow::{bail, Result};
use dashmap::DashMap;
use serde_json::Value;

/// A registered callable. Runs on the executor's blocking pool.
pub type Callable = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

#[derive(Default)]
pub struct FunctionRegistry {
    functions: DashMap<String, Callable>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the arithmetic builtins.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("identity", identity);
        registry.register("inc", inc);
        registry.register("add", add);
        registry.register("sum", sum);
        registry
    }

    /// Register `f` under `name`, replacing any previous entry.
    pub fn register<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(f));
        tracing::debug!(function = name, "registered callable");
    }

    pub fn get(&self, name: &str) -> Option<Callable> {
        self.functions.get(name).map(|f| f.value().clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

// ── Builtins ─────────────────────────────────────────────────────────────────

fn identity(args: &[Value]) -> Result<Value> {
    match args {
        [v] => Ok(v.clone()),
        _ => bail!("identity takes 1 argument, got {}", args.len()),
    }
}

fn inc(args: &[Value]) -> Result<Value> {
    match args {
        [v] => add_numbers(v, &Value::from(1)),
        _ => bail!("inc takes 1 argument, got {}", args.len()),
    }
}

fn add(args: &[Value]) -> Result<Value> {
    match args {
        [a, b] => add_numbers(a, b),
        _ => bail!("add takes 2 arguments, got {}", args.len()),
    }
}

/// Sums its arguments, or the elements of a single array argument.
fn sum(args: &[Value]) -> Result<Value> {
    let items = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };
    items
        .iter()
        .try_fold(Value::from(0), |acc, v| add_numbers(&acc, v))
}

/// Integer addition when both sides are integers, float otherwise.
fn add_numbers(a: &Value, b: &Value) -> Result<Value> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        if let Some(total) = x.checked_add(y) {
            return Ok(Value::from(total));
        }
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => {
            let total = x + y;
            if !total.is_finite() {
                bail!("{a} + {b} overflows");
            }
            Ok(Value::from(total))
        }
        _ => bail!("cannot add {a} and {b}"),
    }
}
