// ABOUTME: Workflow validation over the whole task definition tree
// ABOUTME: Checks flow targets, error references, structural rules and template syntax

use std::collections::HashSet;

use super::error::{Result, ValidationError};
use super::task::{
    ErrorReference, EventConsumptionStrategy, FlowDirective, TaskDefinition, TaskKind, TaskList,
};
use super::workflow::Workflow;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

pub struct WorkflowValidator {
    strict_mode: bool,
    known_calls: HashSet<String>,
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self {
            strict_mode: false,
            known_calls: HashSet::from(["http".to_string()]),
        }
    }

    /// In strict mode calls that resolve to nothing known are errors rather than warnings.
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    pub fn with_known_calls<I, S>(mut self, calls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_calls.extend(calls.into_iter().map(Into::into));
        self
    }

    /// Validate a complete workflow
    pub fn validate(&self, workflow: &Workflow) -> Result<ValidationReport> {
        let mut report = ValidationReport::new();

        if workflow.do_.is_empty() {
            report.errors.push(ValidationError::EmptyWorkflow);
        }

        self.validate_list(workflow, "do", &workflow.do_, true, &mut report);

        for (name, function) in &workflow.use_.functions {
            if !matches!(function.kind, TaskKind::Call(_) | TaskKind::Run(_)) {
                report.errors.push(ValidationError::InvalidTaskConfig {
                    task: format!("use.functions.{}", name),
                    reason: format!("functions must be call or run tasks, found {}", function.kind),
                });
            }
            self.validate_task(workflow, &format!("use.functions.{}", name), function, &mut report);
        }

        report.is_valid = report.errors.is_empty();
        Ok(report)
    }

    /// Validate a task list; `sequential` is false for concurrent branches, whose directives are ignored.
    fn validate_list(
        &self,
        workflow: &Workflow,
        prefix: &str,
        tasks: &TaskList,
        sequential: bool,
        report: &mut ValidationReport,
    ) {
        for (name, task) in tasks.iter() {
            let path = format!("{}/{}", prefix, name);

            let mut targets = Vec::new();
            if let Some(FlowDirective::Goto(target)) = &task.then {
                targets.push(target.clone());
            }
            if let TaskKind::Switch(switch) = &task.kind {
                for case in switch.cases.values() {
                    if let Some(FlowDirective::Goto(target)) = &case.then {
                        targets.push(target.clone());
                    }
                }
            }
            for target in targets {
                if tasks.get(&target).is_none() {
                    report.errors.push(ValidationError::UnknownFlowTarget {
                        task: path.clone(),
                        target,
                    });
                } else if !sequential {
                    report.warnings.push(format!(
                        "Task '{}' jumps to '{}' from a concurrent branch; the directive is ignored",
                        path, target
                    ));
                }
            }

            self.validate_task(workflow, &path, task, report);
        }
    }

    fn validate_task(
        &self,
        workflow: &Workflow,
        path: &str,
        task: &TaskDefinition,
        report: &mut ValidationReport,
    ) {
        if let Some(condition) = &task.if_ {
            self.check_template(&format!("{}.if", path), condition, report);
        }

        match &task.kind {
            TaskKind::Do(tasks) => {
                if tasks.is_empty() {
                    self.invalid(path, "do requires at least one task", report);
                }
                self.validate_list(workflow, &format!("{}/do", path), tasks, true, report);
            }
            TaskKind::Extension(extension) => {
                if extension.do_.is_empty() {
                    self.invalid(path, "extension requires at least one task", report);
                }
                self.validate_list(workflow, path, &extension.do_, true, report);
            }
            TaskKind::Fork(fork) => {
                if fork.branches.len() < 2 {
                    self.invalid(path, "fork requires at least two branches", report);
                }
                self.validate_list(
                    workflow,
                    &format!("{}/fork", path),
                    &fork.branches,
                    false,
                    report,
                );
            }
            TaskKind::Composite(composite) => {
                match (&composite.sequentially, &composite.concurrently) {
                    (Some(tasks), None) => {
                        if tasks.is_empty() {
                            self.invalid(
                                path,
                                "execute.sequentially requires at least one task",
                                report,
                            );
                        }
                        self.validate_list(workflow, &format!("{}/do", path), tasks, true, report);
                    }
                    (None, Some(tasks)) => {
                        if tasks.len() < 2 {
                            self.invalid(
                                path,
                                "execute.concurrently requires at least two tasks",
                                report,
                            );
                        }
                        self.validate_list(
                            workflow,
                            &format!("{}/fork", path),
                            tasks,
                            false,
                            report,
                        );
                    }
                    _ => self.invalid(
                        path,
                        "execute must declare exactly one of sequentially or concurrently",
                        report,
                    ),
                }
            }
            TaskKind::For(for_) => {
                self.check_template(&format!("{}.for.in", path), &for_.for_.in_, report);
                if let Some(condition) = &for_.while_ {
                    self.check_template(&format!("{}.while", path), condition, report);
                }
                self.validate_list(workflow, &format!("{}/for", path), &for_.do_, true, report);
            }
            TaskKind::Try(try_) => {
                if try_.try_.is_empty() {
                    self.invalid(path, "try requires at least one task", report);
                }
                self.validate_list(workflow, &format!("{}/try", path), &try_.try_, true, report);
                let guards = [
                    ("when", &try_.catch.when),
                    ("exceptWhen", &try_.catch.except_when),
                ];
                for (field, condition) in guards {
                    if let Some(condition) = condition {
                        let location = format!("{}.catch.{}", path, field);
                        self.check_template(&location, condition, report);
                    }
                }
                if let Some(handler) = &try_.catch.do_ {
                    self.validate_list(
                        workflow,
                        &format!("{}/catch/do", path),
                        handler,
                        true,
                        report,
                    );
                }
            }
            TaskKind::Switch(switch) => {
                if switch.cases.is_empty() {
                    self.invalid(path, "switch requires at least one case", report);
                }
                let defaults = switch.cases.values().filter(|case| case.when.is_none()).count();
                if defaults > 1 {
                    self.invalid(path, "switch may declare at most one default case", report);
                }
                for (name, case) in &switch.cases {
                    if let Some(condition) = &case.when {
                        let location = format!("{}.switch.{}", path, name);
                        self.check_template(&location, condition, report);
                    }
                }
            }
            TaskKind::Raise(raise) => {
                if let ErrorReference::Named(name) = &raise.error {
                    if workflow.error(name).is_none() {
                        report.errors.push(ValidationError::UnknownError {
                            task: path.to_string(),
                            error: name.clone(),
                        });
                    }
                }
            }
            TaskKind::Listen(listen) => {
                if let EventConsumptionStrategy::Any(filters)
                | EventConsumptionStrategy::All(filters) = &listen.listen.to
                {
                    if filters.is_empty() {
                        self.invalid(path, "listen.to requires at least one event filter", report);
                    }
                }
                if let Some(foreach) = &listen.foreach {
                    if let Some(tasks) = &foreach.do_ {
                        self.validate_list(
                            workflow,
                            &format!("{}/foreach", path),
                            tasks,
                            true,
                            report,
                        );
                    }
                }
            }
            TaskKind::Call(call) => {
                let known = self.known_calls.contains(&call.call)
                    || workflow.function(&call.call).is_some();
                if !known {
                    let message = format!(
                        "Task '{}' calls '{}' which is neither a built-in handler nor a declared function",
                        path, call.call
                    );
                    if self.strict_mode {
                        self.invalid(path, &message, report);
                    } else {
                        report.warnings.push(message);
                    }
                }
            }
            TaskKind::Set(_) | TaskKind::Emit(_) | TaskKind::Wait(_) | TaskKind::Run(_) => {}
        }
    }

    fn invalid(&self, path: &str, reason: &str, report: &mut ValidationReport) {
        report.errors.push(ValidationError::InvalidTaskConfig {
            task: path.to_string(),
            reason: reason.to_string(),
        });
    }

    fn check_template(&self, field: &str, template: &str, report: &mut ValidationReport) {
        if let Err(error) = self.validate_template_syntax(template) {
            report.errors.push(ValidationError::InvalidTemplate {
                field: field.to_string(),
                error,
            });
        }
    }

    /// Basic template syntax validation
    fn validate_template_syntax(&self, template: &str) -> std::result::Result<(), String> {
        let mut brace_count = 0;

        for ch in template.chars() {
            match ch {
                '{' => {
                    brace_count += 1;
                    // triple-stash is the widest mustache form handlebars accepts
                    if brace_count > 3 {
                        return Err("nested template expressions not allowed".to_string());
                    }
                }
                '}' => {
                    if brace_count > 0 {
                        brace_count -= 1;
                    } else {
                        return Err("unmatched closing brace".to_string());
                    }
                }
                _ => {}
            }
        }

        if brace_count != 0 {
            return Err("unmatched template braces".to_string());
        }

        Ok(())
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl Default for WorkflowValidator {
    fn default() -> Self {
        Self::new()
    }
}
