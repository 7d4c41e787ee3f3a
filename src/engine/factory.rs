// ABOUTME: Task executor factory resolving a definition's kind to its behavior
// ABOUTME: Pure construction step that rejects structurally invalid definitions

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::error::{ExecutionError, Result};
use super::executor::{TaskBehavior, TaskExecutor};
use super::instance::TaskInstance;
use super::services::EngineServices;
use crate::parser::{TaskDefinition, TaskKind, TaskList};
use crate::tasks::{
    CallTask, DoTask, EmitTask, ForTask, ForkTask, ListenTask, RaiseTask, RunTask, SetTask,
    SwitchTask, TryTask, WaitTask,
};

pub struct TaskExecutorFactory;

impl TaskExecutorFactory {
    /// Builds a not-yet-initialized executor for `instance`.
    pub fn create(
        services: EngineServices,
        instance: TaskInstance,
        definition: Arc<TaskDefinition>,
        cancellation: CancellationToken,
    ) -> Result<TaskExecutor> {
        let behavior = Self::behavior(&instance, &definition)?;
        Ok(TaskExecutor::new(
            services,
            instance,
            definition,
            behavior,
            cancellation,
        ))
    }

    fn behavior(
        instance: &TaskInstance,
        definition: &TaskDefinition,
    ) -> Result<Box<dyn TaskBehavior>> {
        let path = instance.path.as_str();
        let behavior: Box<dyn TaskBehavior> = match &definition.kind {
            TaskKind::Set(value) => Box::new(SetTask::new(value.clone())),
            TaskKind::Raise(raise) => Box::new(RaiseTask::new(raise.clone())),
            TaskKind::Emit(emit) => Box::new(EmitTask::new(emit.clone())),
            TaskKind::Wait(duration) => Box::new(WaitTask::new(*duration)),
            TaskKind::Switch(switch) => {
                if switch.cases.is_empty() {
                    return Err(ExecutionError::configuration(path, "switch declares no cases"));
                }
                let defaults = switch.cases.values().filter(|case| case.when.is_none()).count();
                if defaults > 1 {
                    return Err(ExecutionError::configuration(
                        path,
                        "switch declares more than one default case",
                    ));
                }
                Box::new(SwitchTask::new(switch.clone()))
            }
            TaskKind::Try(try_) => {
                require_tasks(path, "try", &try_.try_)?;
                Box::new(TryTask::new(try_.clone()))
            }
            TaskKind::Do(tasks) => {
                require_tasks(path, "do", tasks)?;
                Box::new(
                    DoTask::new(tasks.clone(), !instance.is_extension)
                        .handing_off_flow(definition.hands_off_flow),
                )
            }
            TaskKind::Fork(fork) => {
                require_branches(path, &fork.branches)?;
                Box::new(ForkTask::new(fork.branches.clone(), fork.compete))
            }
            TaskKind::For(for_) => {
                require_tasks(path, "for", &for_.do_)?;
                Box::new(ForTask::new(for_.clone()))
            }
            TaskKind::Listen(listen) => Box::new(ListenTask::new(listen.clone())),
            TaskKind::Call(call) => Box::new(CallTask::new(call.clone())),
            TaskKind::Run(run) => Box::new(RunTask::new(run.clone())),
            TaskKind::Extension(extension) => {
                require_tasks(path, "extension", &extension.do_)?;
                Box::new(DoTask::new(extension.do_.clone(), false))
            }
            TaskKind::Composite(composite) => {
                match (&composite.sequentially, &composite.concurrently) {
                    (Some(tasks), None) => {
                        require_tasks(path, "execute.sequentially", tasks)?;
                        Box::new(DoTask::new(tasks.clone(), true))
                    }
                    (None, Some(branches)) => {
                        require_branches(path, branches)?;
                        Box::new(ForkTask::new(branches.clone(), composite.compete))
                    }
                    _ => {
                        return Err(ExecutionError::configuration(
                            path,
                            "execute must declare exactly one of 'sequentially' or 'concurrently'",
                        ))
                    }
                }
            }
        };
        Ok(behavior)
    }
}

fn require_tasks(path: &str, field: &str, tasks: &TaskList) -> Result<()> {
    if tasks.is_empty() {
        return Err(ExecutionError::configuration(
            path,
            format!("'{}' declares no tasks", field),
        ));
    }
    Ok(())
}

fn require_branches(path: &str, branches: &TaskList) -> Result<()> {
    if branches.len() < 2 {
        return Err(ExecutionError::configuration(
            path,
            format!(
                "concurrent execution needs at least two branches, found {}",
                branches.len()
            ),
        ));
    }
    Ok(())
}
