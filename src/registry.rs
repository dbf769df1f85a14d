//! Explicit registry of callable tasks.
//!
//! Tasks are registered up front and the registry is immutable afterwards,
//! so worker-side lookups are plain concurrent reads. A task is addressed as
//! `<qualifier>#<method>`; a qualifier may expose several methods, and a
//! method name may be overloaded on its argument shapes. Dispatch picks the
//! first entry whose declared signature matches the runtime shape of the
//! decoded arguments.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::{CourierError, CourierResult, TaskFailure};

/// Runtime shape class of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// Matches only JSON null
    Null,
    /// Matches booleans
    Bool,
    /// Matches integral numbers
    Int,
    /// Matches any number, integral included
    Float,
    /// Matches strings
    Str,
    /// Matches arrays
    List,
    /// Matches objects
    Map,
    /// Matches anything
    Any,
}

impl ArgKind {
    /// Whether a decoded argument is assignable to this shape.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgKind::Null => value.is_null(),
            ArgKind::Bool => value.is_boolean(),
            ArgKind::Int => value.is_i64() || value.is_u64(),
            ArgKind::Float => value.is_number(),
            ArgKind::Str => value.is_string(),
            ArgKind::List => value.is_array(),
            ArgKind::Map => value.is_object(),
            ArgKind::Any => true,
        }
    }
}

/// Async handler invoked with the decoded positional arguments.
///
/// `Ok(None)` models a void method: the task succeeded but there is nothing
/// to report. `Err` is a failure of the task body itself.
pub type TaskHandler =
    Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Option<Value>, TaskFailure>> + Send + Sync>;

/// One registered method of a task qualifier.
pub struct MethodEntry {
    name: String,
    signature: Vec<ArgKind>,
    handler: TaskHandler,
}

impl MethodEntry {
    fn accepts(&self, name: &str, args: &[Value]) -> bool {
        self.name == name
            && self.signature.len() == args.len()
            && self
                .signature
                .iter()
                .zip(args)
                .all(|(kind, arg)| kind.matches(arg))
    }
}

/// Immutable task lookup table.
pub struct TaskRegistry {
    tasks: HashMap<String, Vec<MethodEntry>>,
}

impl TaskRegistry {
    /// Start building a registry
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder {
            tasks: HashMap::new(),
        }
    }

    /// Resolve a `<qualifier>#<method>` name against the decoded arguments.
    pub fn resolve(&self, task: &str, args: &[Value]) -> CourierResult<TaskHandler> {
        let (qualifier, method) = task
            .split_once('#')
            .ok_or_else(|| CourierError::dispatch(format!("malformed task name: {task}")))?;

        let entries = self
            .tasks
            .get(qualifier)
            .ok_or_else(|| CourierError::dispatch(format!("task not registered: {qualifier}")))?;

        entries
            .iter()
            .find(|entry| entry.accepts(method, args))
            .map(|entry| Arc::clone(&entry.handler))
            .ok_or_else(|| {
                CourierError::dispatch(format!(
                    "no method {method}/{} on task {qualifier} matching the arguments",
                    args.len()
                ))
            })
    }

    /// Registered qualifiers, sorted, for startup diagnostics.
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Builder for [`TaskRegistry`].
pub struct TaskRegistryBuilder {
    tasks: HashMap<String, Vec<MethodEntry>>,
}

impl TaskRegistryBuilder {
    /// Register a method under a task qualifier.
    pub fn method<F, Fut>(
        mut self,
        qualifier: impl Into<String>,
        name: impl Into<String>,
        signature: &[ArgKind],
        handler: F,
    ) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, TaskFailure>> + Send + 'static,
    {
        let entry = MethodEntry {
            name: name.into(),
            signature: signature.to_vec(),
            handler: Arc::new(
                move |args| -> BoxFuture<'static, Result<Option<Value>, TaskFailure>> {
                    Box::pin(handler(args))
                },
            ),
        };
        self.tasks.entry(qualifier.into()).or_default().push(entry);
        self
    }

    /// Finish building; the registry is immutable from here on.
    pub fn build(self) -> TaskRegistry {
        TaskRegistry { tasks: self.tasks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn calc_registry() -> TaskRegistry {
        TaskRegistry::builder()
            .method(
                "tasks.Calc",
                "sum",
                &[ArgKind::Int, ArgKind::Int],
                |args| async move {
                    let a = args[0].as_i64().unwrap();
                    let b = args[1].as_i64().unwrap();
                    Ok(Some(json!(a + b)))
                },
            )
            .method(
                "tasks.Calc",
                "sum",
                &[ArgKind::Float, ArgKind::Float],
                |args| async move {
                    let a = args[0].as_f64().unwrap();
                    let b = args[1].as_f64().unwrap();
                    Ok(Some(json!(a + b)))
                },
            )
            .method("tasks.Calc", "touch", &[ArgKind::Str], |_args| async move {
                Ok(None)
            })
            .build()
    }

    #[tokio::test]
    async fn resolves_by_name_and_argument_shape() {
        let registry = calc_registry();

        let handler = registry
            .resolve("tasks.Calc#sum", &[json!(1), json!(2)])
            .unwrap();
        assert_eq!(handler(vec![json!(1), json!(2)]).await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn fractional_args_fall_through_to_the_float_overload() {
        let registry = calc_registry();

        let handler = registry
            .resolve("tasks.Calc#sum", &[json!(1.5), json!(2.5)])
            .unwrap();
        assert_eq!(
            handler(vec![json!(1.5), json!(2.5)]).await.unwrap(),
            Some(json!(4.0))
        );
    }

    #[tokio::test]
    async fn void_methods_return_none() {
        let registry = calc_registry();
        let handler = registry
            .resolve("tasks.Calc#touch", &[json!("x")])
            .unwrap();
        assert_eq!(handler(vec![json!("x")]).await.unwrap(), None);
    }

    #[test]
    fn unknown_qualifier_is_a_dispatch_error() {
        let registry = calc_registry();
        let err = registry.resolve("tasks.Nope#sum", &[]).err().unwrap();
        assert!(matches!(err, CourierError::Dispatch { .. }));
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn shape_mismatch_is_a_dispatch_error() {
        let registry = calc_registry();
        let err = registry
            .resolve("tasks.Calc#sum", &[json!("one"), json!("two")])
            .err()
            .unwrap();
        assert!(matches!(err, CourierError::Dispatch { .. }));
        assert!(err.to_string().contains("no method"));
    }

    #[test]
    fn malformed_task_name_is_a_dispatch_error() {
        let registry = calc_registry();
        let err = registry.resolve("no-separator", &[]).err().unwrap();
        assert!(matches!(err, CourierError::Dispatch { .. }));
    }

    #[test]
    fn task_names_are_sorted() {
        let registry = TaskRegistry::builder()
            .method("b.Task", "run", &[], |_| async { Ok(None) })
            .method("a.Task", "run", &[], |_| async { Ok(None) })
            .build();
        assert_eq!(registry.task_names(), vec!["a.Task", "b.Task"]);
    }

    #[test]
    fn arg_kind_matching_follows_assignability() {
        assert!(ArgKind::Int.matches(&json!(3)));
        assert!(!ArgKind::Int.matches(&json!(3.5)));
        assert!(ArgKind::Float.matches(&json!(3)));
        assert!(ArgKind::Float.matches(&json!(3.5)));
        assert!(ArgKind::Any.matches(&json!(null)));
        assert!(ArgKind::Null.matches(&json!(null)));
        assert!(!ArgKind::Str.matches(&json!(null)));
        assert!(ArgKind::List.matches(&json!([1])));
        assert!(ArgKind::Map.matches(&json!({"k": 1})));
    }
}
