//! In-process collaborators.
//!
//! - `store` -- DashMap-backed `StateStore` and `CounterTriggerAdmin`
//! - `scheduler` -- FIFO queue of dynamic-next requests

pub mod scheduler;
pub mod store;

pub use scheduler::InMemoryScheduler;
pub use store::{CounterTrigger, InMemoryStateStore};

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{Value, json};
    use statecraft_core::scheduler::{DynamicNext, Scheduler};
    use statecraft_core::workflow::context::{RunContext, StateEnv};
    use statecraft_core::workflow::definition::StateDefinition;
    use statecraft_core::workflow::interpreter::{StateInterpreter, Transition};
    use statecraft_core::workflow::invoker::{InProcessInvoker, TaskInvocationError, TaskInvoker};
    use statecraft_core::workflow::parallel::END_TARGET;
    use statecraft_types::config::InterpreterConfig;
    use statecraft_types::metadata::StateAction;
    use tokio::sync::mpsc;

    use super::*;

    const TOPIC_PREFIX: &str = "wf_";

    fn workflow(states: Vec<(&str, &str, Value)>) -> HashMap<String, StateInterpreter> {
        states
            .into_iter()
            .map(|(type_name, name, doc)| {
                let definition = StateDefinition::from_value(type_name, name, doc).unwrap();
                let interpreter =
                    StateInterpreter::new(definition, &InterpreterConfig::default()).unwrap();
                (name.to_string(), interpreter)
            })
            .collect()
    }

    /// Runs queued invocations until both the scheduler and the trigger
    /// channel are idle. Returns the outputs of states that ended the run.
    async fn drive<T: TaskInvoker>(
        states: &HashMap<String, StateInterpreter>,
        store: &InMemoryStateStore,
        triggers: &mut mpsc::UnboundedReceiver<CounterTrigger>,
        scheduler: &InMemoryScheduler,
        task: &T,
        run: &mut RunContext,
    ) -> Vec<Value> {
        let env = StateEnv::new(store, store, scheduler);
        let mut finished = Vec::new();

        loop {
            if let Some(DynamicNext { next, value }) = scheduler.pop() {
                if next == END_TARGET {
                    finished.push(value);
                    continue;
                }
                let state = &states[&next];
                let mut ctx = run.for_topic(format!("{TOPIC_PREFIX}{next}"));
                let outcome = state.execute(&value, &mut ctx, &env, task).await.unwrap();
                run.metadata = ctx.metadata;

                if outcome.transition == Transition::End
                    && !state.definition().is_branch_terminal()
                {
                    finished.push(outcome.output.clone());
                }
                for follow_up in outcome.follow_ups() {
                    scheduler.add_dynamic_next(&follow_up.next, follow_up.value);
                }
                continue;
            }

            let Ok(trigger) = triggers.try_recv() else {
                break;
            };
            let topic = trigger.metadata.function_topic.clone();
            let name = topic.strip_prefix(TOPIC_PREFIX).unwrap();
            let mut ctx = run.for_topic(topic.clone());
            ctx.metadata.state_action = Some(StateAction::PostParallelProcessing);
            let input = serde_json::to_value(&trigger.metadata).unwrap();
            states[name].execute(&input, &mut ctx, &env, task).await.unwrap();
        }
        finished
    }

    #[tokio::test]
    async fn test_task_choice_pass_run() {
        let states = workflow(vec![
            ("Task", "Count", json!({"Type": "Task", "Next": "Route"})),
            (
                "Choice",
                "Route",
                json!({
                    "Type": "Choice",
                    "Choices": [
                        {"Variable": "$.count", "NumericGreaterThan": 3, "Next": "highPath"}
                    ],
                    "Default": "lowPath"
                }),
            ),
            ("Pass", "highPath", json!({"Type": "Pass", "Result": {"done": true}, "End": true})),
            ("Pass", "lowPath", json!({"Type": "Pass", "Result": {"done": false}, "End": true})),
        ]);
        let (store, mut triggers) = InMemoryStateStore::with_triggers();
        let scheduler = InMemoryScheduler::new();
        let task = InProcessInvoker::new(|_input: Value| async move {
            Ok::<_, TaskInvocationError>(json!({"count": 5}))
        });

        let mut run = RunContext::new("run1", "wf");
        scheduler.add_dynamic_next("Count", json!({}));
        let finished = drive(&states, &store, &mut triggers, &scheduler, &task, &mut run).await;

        assert_eq!(finished, vec![json!({"done": true})]);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_parallel_run_joins_in_branch_order_and_cleans_up() {
        let states = workflow(vec![
            (
                "Parallel",
                "Fan",
                json!({
                    "Type": "Parallel",
                    "BranchCount": 2,
                    "Branches": [{"StartAt": "Left"}, {"StartAt": "Right"}],
                    "Next": "Merge"
                }),
            ),
            (
                "Pass",
                "Left",
                json!({
                    "Type": "Pass",
                    "Result": "L",
                    "End": true,
                    "ParentParallelInfo": {"Name": "Fan", "BranchCounter": 1}
                }),
            ),
            (
                "Task",
                "Right",
                json!({
                    "Type": "Task",
                    "End": true,
                    "ParentParallelInfo": {"Name": "Fan", "BranchCounter": 2}
                }),
            ),
            ("Pass", "Merge", json!({"Type": "Pass", "End": true})),
        ]);
        let (store, mut triggers) = InMemoryStateStore::with_triggers();
        let scheduler = InMemoryScheduler::new();
        let task = InProcessInvoker::new(|input: Value| async move {
            let v = input["v"].as_i64().unwrap_or(0);
            Ok::<_, TaskInvocationError>(json!({"r": v * 2}))
        });

        let mut run = RunContext::new("run1", "wf");
        scheduler.add_dynamic_next("Fan", json!({"v": 1}));
        let finished = drive(&states, &store, &mut triggers, &scheduler, &task, &mut run).await;

        assert_eq!(finished, vec![json!(["L", {"r": 2}])]);
        assert_eq!(store.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_join_trigger_is_noop() {
        let states = workflow(vec![
            (
                "Parallel",
                "Fan",
                json!({
                    "Type": "Parallel",
                    "BranchCount": 1,
                    "Branches": [{"StartAt": "Only"}],
                    "End": true
                }),
            ),
            (
                "Pass",
                "Only",
                json!({
                    "Type": "Pass",
                    "End": true,
                    "ParentParallelInfo": {"Name": "Fan", "BranchCounter": 1}
                }),
            ),
        ]);
        let (store, mut triggers) = InMemoryStateStore::with_triggers();
        let scheduler = InMemoryScheduler::new();
        let task = InProcessInvoker::new(|input: Value| async move {
            Ok::<_, TaskInvocationError>(input)
        });

        let mut run = RunContext::new("run1", "wf");
        scheduler.add_dynamic_next("Fan", json!({"x": 1}));

        // Run up to the join, keeping the trigger to replay it afterwards.
        let env = StateEnv::new(&store, &store, &scheduler);
        while let Some(DynamicNext { next, value }) = scheduler.pop() {
            let mut ctx = run.for_topic(format!("{TOPIC_PREFIX}{next}"));
            states[&next].execute(&value, &mut ctx, &env, &task).await.unwrap();
            run.metadata = ctx.metadata;
        }
        let trigger = triggers.try_recv().unwrap();
        let input = serde_json::to_value(&trigger.metadata).unwrap();

        let mut join_ctx = run.for_topic("wf_Fan");
        join_ctx.metadata.state_action = Some(StateAction::PostParallelProcessing);
        let first = states["Fan"].execute(&input, &mut join_ctx, &env, &task).await.unwrap();
        assert_eq!(first.output, json!([{"x": 1}]));
        assert_eq!(
            scheduler.drain(),
            vec![DynamicNext::new(END_TARGET, json!([{"x": 1}]))]
        );
        assert_eq!(store.entry_count(), 0);

        let second = states["Fan"].execute(&input, &mut join_ctx, &env, &task).await.unwrap();
        assert_eq!(second.output, Value::Null);
        assert!(scheduler.is_empty());
    }
}
