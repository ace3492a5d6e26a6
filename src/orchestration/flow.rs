//! # Flow Model
//!
//! A [`Flow`] is an ordered list of [`FlowStep`]s. Steps nest: parallel and
//! condition steps carry their own child steps, which the orchestrator runs
//! recursively. Mapping functions and predicates are plain closures that
//! see the flow input and the outputs recorded so far, keyed by step id.

use crate::orchestration::task_executor::TaskExecutionOptions;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Outputs of completed steps keyed by step id
pub type StepOutputs = HashMap<String, Value>;

/// Builds a task step's input from the flow input and prior outputs
pub type InputMapping = Arc<dyn Fn(&Value, &StepOutputs) -> Value + Send + Sync>;

/// Reshapes a task step's output before it is recorded
pub type OutputMapping = Arc<dyn Fn(Value) -> Value + Send + Sync>;

pub type ConditionPredicate = Arc<dyn Fn(&Value, &StepOutputs) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum FlowStepKind {
    Task {
        task_id: String,
        input_mapping: Option<InputMapping>,
        output_mapping: Option<OutputMapping>,
        options: Option<TaskExecutionOptions>,
    },
    Parallel {
        steps: Vec<FlowStep>,
        /// Children per batch, further capped by `FlowOptions::max_parallel_executions`
        concurrency_limit: usize,
    },
    Condition {
        predicate: ConditionPredicate,
        then_steps: Vec<FlowStep>,
        else_steps: Vec<FlowStep>,
    },
    Wait {
        duration: Duration,
    },
}

impl FlowStepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Task { .. } => "task",
            Self::Parallel { .. } => "parallel",
            Self::Condition { .. } => "condition",
            Self::Wait { .. } => "wait",
        }
    }

    /// Parallel and condition steps run other steps
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Parallel { .. } | Self::Condition { .. })
    }
}

impl fmt::Debug for FlowStepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task {
                task_id,
                input_mapping,
                output_mapping,
                options,
            } => f
                .debug_struct("Task")
                .field("task_id", task_id)
                .field("input_mapping", &input_mapping.is_some())
                .field("output_mapping", &output_mapping.is_some())
                .field("options", options)
                .finish(),
            Self::Parallel {
                steps,
                concurrency_limit,
            } => f
                .debug_struct("Parallel")
                .field("steps", steps)
                .field("concurrency_limit", concurrency_limit)
                .finish(),
            Self::Condition {
                then_steps,
                else_steps,
                ..
            } => f
                .debug_struct("Condition")
                .field("then_steps", then_steps)
                .field("else_steps", else_steps)
                .finish_non_exhaustive(),
            Self::Wait { duration } => f.debug_struct("Wait").field("duration", duration).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowStep {
    pub id: String,
    pub kind: FlowStepKind,
}

impl FlowStep {
    /// Task step; without an input mapping the task receives the flow input
    pub fn task(id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: FlowStepKind::Task {
                task_id: task_id.into(),
                input_mapping: None,
                output_mapping: None,
                options: None,
            },
        }
    }

    pub fn parallel(id: impl Into<String>, steps: Vec<FlowStep>, concurrency_limit: usize) -> Self {
        Self {
            id: id.into(),
            kind: FlowStepKind::Parallel {
                steps,
                concurrency_limit,
            },
        }
    }

    pub fn condition<P>(
        id: impl Into<String>,
        predicate: P,
        then_steps: Vec<FlowStep>,
        else_steps: Vec<FlowStep>,
    ) -> Self
    where
        P: Fn(&Value, &StepOutputs) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            kind: FlowStepKind::Condition {
                predicate: Arc::new(predicate),
                then_steps,
                else_steps,
            },
        }
    }

    pub fn wait(id: impl Into<String>, duration: Duration) -> Self {
        Self {
            id: id.into(),
            kind: FlowStepKind::Wait { duration },
        }
    }

    /// No effect on non-task steps
    pub fn with_input_mapping<F>(mut self, mapping: F) -> Self
    where
        F: Fn(&Value, &StepOutputs) -> Value + Send + Sync + 'static,
    {
        if let FlowStepKind::Task { input_mapping, .. } = &mut self.kind {
            *input_mapping = Some(Arc::new(mapping));
        }
        self
    }

    /// No effect on non-task steps
    pub fn with_output_mapping<F>(mut self, mapping: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        if let FlowStepKind::Task { output_mapping, .. } = &mut self.kind {
            *output_mapping = Some(Arc::new(mapping));
        }
        self
    }

    /// No effect on non-task steps
    pub fn with_task_options(mut self, task_options: TaskExecutionOptions) -> Self {
        if let FlowStepKind::Task { options, .. } = &mut self.kind {
            *options = Some(task_options);
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct Flow {
    pub id: String,
    pub description: Option<String>,
    pub steps: Vec<FlowStep>,
}

impl Flow {
    pub fn new(id: impl Into<String>, steps: Vec<FlowStep>) -> Self {
        Self {
            id: id.into(),
            description: None,
            steps,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_step(mut self, step: FlowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Every step id, nested ones included, in declaration order
    pub fn step_ids(&self) -> Vec<&str> {
        fn collect<'a>(steps: &'a [FlowStep], ids: &mut Vec<&'a str>) {
            for step in steps {
                ids.push(&step.id);
                match &step.kind {
                    FlowStepKind::Parallel { steps, .. } => collect(steps, ids),
                    FlowStepKind::Condition {
                        then_steps,
                        else_steps,
                        ..
                    } => {
                        collect(then_steps, ids);
                        collect(else_steps, ids);
                    }
                    FlowStepKind::Task { .. } | FlowStepKind::Wait { .. } => {}
                }
            }
        }

        let mut ids = Vec::new();
        collect(&self.steps, &mut ids);
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_ids_include_nested_steps() {
        let flow = Flow::new(
            "checkout",
            vec![
                FlowStep::task("validate", "validate_order"),
                FlowStep::parallel(
                    "reserve",
                    vec![
                        FlowStep::task("stock", "reserve_stock"),
                        FlowStep::task("credit", "reserve_credit"),
                    ],
                    2,
                ),
                FlowStep::condition("gift", |input, _| input["gift"] == json!(true), vec![FlowStep::task("wrap", "wrap_gift")], vec![]),
            ],
        );
        assert_eq!(
            flow.step_ids(),
            vec!["validate", "reserve", "stock", "credit", "gift", "wrap"]
        );
    }

    #[test]
    fn test_composite_kinds() {
        assert!(FlowStep::parallel("p", vec![], 2).kind.is_composite());
        assert!(FlowStep::condition("c", |_, _| true, vec![], vec![]).kind.is_composite());
        assert!(!FlowStep::task("t", "task").kind.is_composite());
        assert!(!FlowStep::wait("w", Duration::from_millis(1)).kind.is_composite());
    }

    #[test]
    fn test_mappings_only_apply_to_task_steps() {
        let step = FlowStep::wait("pause", Duration::from_millis(5)).with_input_mapping(|input, _| input.clone());
        assert_eq!(step.kind.name(), "wait");

        let step = FlowStep::task("t", "task").with_output_mapping(|out| json!({ "wrapped": out }));
        match step.kind {
            FlowStepKind::Task { output_mapping, .. } => {
                let mapping = output_mapping.unwrap();
                assert_eq!(mapping(json!(1)), json!({ "wrapped": 1 }));
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }
}
