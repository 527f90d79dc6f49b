//! Per-state interpreter.
//!
//! One invocation evaluates one state: InputPath, type-specific execution,
//! then ResultPath and OutputPath. Parallel states skip the data-flow paths
//! because their aggregation already defines the output. A state that ends a
//! Parallel branch records its output for the join before returning.

use serde_json::Value;
use statecraft_types::config::InterpreterConfig;
use statecraft_types::metadata::{CounterTriggerMetadata, ExecutionMetadata};
use statecraft_types::state::StateType;
use thiserror::Error;
use tracing::{debug, info};

use super::choice::{ChoiceError, ChoiceRules, choice_results};
use super::context::{RunContext, StateEnv};
use super::definition::{DefinitionError, StateDefinition};
use super::invoker::{TaskInvocationError, TaskInvoker};
use super::parallel::{JoinOutcome, ParallelCoordinator, ParallelError};
use super::paths::{PathError, apply_input_path, apply_output_path, apply_result_path};
use super::retry::{RETRY_EXHAUSTED_CAUSE, RetryCatchExecutor, TaskOutcome};
use super::wait::{self, WaitError};
use crate::scheduler::{DynamicNext, Scheduler};
use crate::storage::counter_trigger::CounterTriggerAdmin;
use crate::storage::state_store::StateStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Any failure surfaced to the scheduler by a state invocation.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error(transparent)]
    Choice(#[from] ChoiceError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Parallel(#[from] ParallelError),

    #[error("task failed: {0}")]
    Task(#[from] TaskInvocationError),

    /// A join was requested but the input is not counter trigger metadata.
    #[error("invalid join trigger input: {0}")]
    InvalidTrigger(String),
}

// ---------------------------------------------------------------------------
// StateOutcome
// ---------------------------------------------------------------------------

/// Where the run goes after this state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The state's declared `Next`.
    Next(String),
    /// Target picked by a Choice state.
    Choice(String),
    /// The workflow (or branch) ends here.
    End,
    /// Follow-up work was already handed to the scheduler (Parallel
    /// fan-out or join, or a task error routed by a catcher).
    Dispatched,
}

/// Diagnostics of a state that failed as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFailure {
    pub error: Option<String>,
    pub cause: Option<String>,
}

/// Result of one state invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StateOutcome {
    pub output: Value,
    pub transition: Transition,
    pub metadata: ExecutionMetadata,
    pub failure: Option<StateFailure>,
}

impl StateOutcome {
    /// Invocations the scheduler should make for this outcome.
    pub fn follow_ups(&self) -> Vec<DynamicNext> {
        match &self.transition {
            Transition::Next(next) => vec![DynamicNext::new(next.clone(), self.output.clone())],
            Transition::Choice(next) => choice_results(next, self.output.clone()),
            Transition::End | Transition::Dispatched => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// StateInterpreter
// ---------------------------------------------------------------------------

/// Evaluates one parsed state.
pub struct StateInterpreter {
    definition: StateDefinition,
    choice: Option<ChoiceRules>,
    parallel: ParallelCoordinator,
}

impl StateInterpreter {
    /// Build an interpreter, compiling Choice rules up front.
    pub fn new(
        definition: StateDefinition,
        config: &InterpreterConfig,
    ) -> Result<Self, InterpreterError> {
        let choice = match definition.state_type() {
            StateType::Choice => {
                let body = definition.body();
                Some(ChoiceRules::compile(&body.choices, body.default.as_deref())?)
            }
            _ => None,
        };
        Ok(Self {
            definition,
            choice,
            parallel: ParallelCoordinator::new(config),
        })
    }

    pub fn definition(&self) -> &StateDefinition {
        &self.definition
    }

    /// Evaluate the state against `input`.
    ///
    /// `task` runs Task states; other state types ignore it.
    pub async fn execute<S, A, D, T>(
        &self,
        input: &Value,
        run: &mut RunContext,
        env: &StateEnv<'_, S, A, D>,
        task: &T,
    ) -> Result<StateOutcome, InterpreterError>
    where
        S: StateStore,
        A: CounterTriggerAdmin,
        D: Scheduler,
        T: TaskInvoker,
    {
        let name = self.definition.name();
        let state_type = self.definition.state_type();
        let body = self.definition.body();
        debug!(
            state = %name,
            state_type = %state_type,
            execution_id = %run.execution_id,
            "executing state"
        );

        // Join invocations receive trigger metadata, not state data.
        let task_input = if state_type == StateType::Parallel && run.metadata.is_post_parallel() {
            input.clone()
        } else {
            apply_input_path(&body.input_path, input)?
        };
        let mut failure = None;

        let (result, transition) = match state_type {
            StateType::Task => {
                let executor = RetryCatchExecutor::new(name, &body.retry, &body.catch);
                match executor.execute(task, &task_input, env.scheduler).await? {
                    TaskOutcome::Success(output) => (output, self.declared_transition()),
                    TaskOutcome::RetriesExhausted(output) => {
                        failure = Some(StateFailure {
                            error: output.get("Error").and_then(Value::as_str).map(str::to_string),
                            cause: Some(RETRY_EXHAUSTED_CAUSE.to_string()),
                        });
                        (output, self.declared_transition())
                    }
                    TaskOutcome::Caught {
                        result_path: catcher_path,
                        output,
                        ..
                    } => {
                        // Caught outputs are merged with the catcher's ResultPath.
                        let merged = apply_result_path(&catcher_path, input, &output)?;
                        let output = apply_output_path(&body.output_path, &merged)?;
                        return Ok(self.outcome(output, Transition::Dispatched, run, None));
                    }
                }
            }
            StateType::Choice => {
                let next = match &self.choice {
                    Some(rules) => rules.evaluate(&task_input)?,
                    None => return Err(ChoiceError::NoChoiceMatched.into()),
                };
                (task_input, Transition::Choice(next))
            }
            StateType::Pass => {
                let result = body.result.clone().unwrap_or_else(|| task_input.clone());
                (result, self.declared_transition())
            }
            StateType::Succeed => (task_input, Transition::End),
            StateType::Fail => {
                failure = Some(StateFailure {
                    error: body.error.clone(),
                    cause: body.cause.clone(),
                });
                info!(
                    state = %name,
                    error = ?body.error,
                    cause = ?body.cause,
                    "Fail state reached"
                );
                (task_input, Transition::End)
            }
            StateType::Wait => {
                wait::wait(body, &task_input).await?;
                (task_input, self.declared_transition())
            }
            StateType::Parallel => return self.execute_parallel(&task_input, run, env).await,
        };

        let merged = apply_result_path(&body.result_path, input, &result)?;
        let output = apply_output_path(&body.output_path, &merged)?;

        if transition == Transition::End && self.definition.is_branch_terminal() {
            self.parallel
                .process_branch_terminal(&self.definition, &output, run, env)
                .await?;
        }

        Ok(self.outcome(output, transition, run, failure))
    }

    /// Fan out, or join when the metadata carries the post-parallel marker.
    async fn execute_parallel<S, A, D>(
        &self,
        input: &Value,
        run: &mut RunContext,
        env: &StateEnv<'_, S, A, D>,
    ) -> Result<StateOutcome, InterpreterError>
    where
        S: StateStore,
        A: CounterTriggerAdmin,
        D: Scheduler,
    {
        if run.metadata.is_post_parallel() {
            let trigger: CounterTriggerMetadata = serde_json::from_value(input.clone())
                .map_err(|e| InterpreterError::InvalidTrigger(e.to_string()))?;
            let output = match self.parallel.join(&self.definition, &trigger, env).await? {
                JoinOutcome::Joined { output, .. } => output,
                JoinOutcome::AlreadyJoined => Value::Null,
            };
            return Ok(self.outcome(output, Transition::Dispatched, run, None));
        }

        self.parallel
            .fan_out(&self.definition, input, run, env)
            .await?;
        Ok(self.outcome(input.clone(), Transition::Dispatched, run, None))
    }

    /// Transition from the state's own `End` / `Next` fields.
    fn declared_transition(&self) -> Transition {
        let body = self.definition.body();
        match &body.next {
            Some(next) if !body.end => Transition::Next(next.clone()),
            _ => Transition::End,
        }
    }

    fn outcome(
        &self,
        output: Value,
        transition: Transition,
        run: &RunContext,
        failure: Option<StateFailure>,
    ) -> StateOutcome {
        debug!(
            state = %self.definition.name(),
            transition = ?transition,
            "state finished"
        );
        StateOutcome {
            output,
            transition,
            metadata: run.metadata.clone(),
            failure,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
