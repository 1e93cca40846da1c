//! One pure transition per task event.
//!
//! Every function takes the current snapshot by reference and returns the
//! next snapshot; nothing here performs I/O. Terminal tasks reject every
//! event with [`TransitionError::TerminalTask`].

use std::collections::BTreeMap;

use waypoint_core_types::{
    CorrectionRecord, HierarchicalPlan, Plan, StepStatus, SubTaskStatus, Task, TaskStatus,
    TransitionError, VerificationTier,
};

use crate::classify::classify_complexity;
use crate::verification::RoutedVerification;

fn next_snapshot(task: &Task) -> Result<Task, TransitionError> {
    task.ensure_active()?;
    Ok(task.clone())
}

fn count_tier(task: &mut Task, tier: VerificationTier) {
    match tier {
        VerificationTier::Deterministic => task.metrics.deterministic_verdicts += 1,
        VerificationTier::Lightweight => task.metrics.lightweight_verdicts += 1,
        VerificationTier::Full => task.metrics.full_verdicts += 1,
    }
}

/// Moves the cursor's step to `active` if it is still pending.
fn activate_current(plan: &mut Plan) -> Result<(), TransitionError> {
    if let Some(step) = plan.current_step_mut() {
        if step.status == StepStatus::Pending {
            step.transition(StepStatus::Active)?;
        }
    }
    Ok(())
}

pub fn plan_created(task: &Task, plan: Plan, hierarchy: HierarchicalPlan) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.complexity = classify_complexity(Some(&plan), Some(&hierarchy));
    next.plan = Some(plan);
    next.hierarchy = Some(hierarchy);
    next.status = TaskStatus::Executing;
    Ok(next)
}

/// Marks planning as started so a concurrent planner loses the version race.
pub fn planning_started(task: &Task) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.status = TaskStatus::Planning;
    Ok(next)
}

pub fn action_issued(task: &Task, step_index: u32) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.next_step_index = step_index + 1;
    next.awaiting_verification = Some(step_index);
    next.metrics.actions_issued += 1;
    if matches!(next.status, TaskStatus::Created | TaskStatus::Planning) {
        next.status = TaskStatus::Executing;
    }
    Ok(next)
}

pub fn verification_succeeded(task: &Task, verdict: &RoutedVerification) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.consecutive_failures = 0;
    next.awaiting_verification = None;
    next.last_verification = Some(verdict.result.clone());
    count_tier(&mut next, verdict.result.tier);
    if verdict.low_confidence_completion {
        next.metrics.low_confidence_completions += 1;
    }
    if next.status == TaskStatus::Correcting {
        next.status = TaskStatus::Executing;
    }
    Ok(next)
}

pub fn verification_failed(task: &Task, verdict: &RoutedVerification) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.consecutive_failures += 1;
    next.awaiting_verification = None;
    next.last_verification = Some(verdict.result.clone());
    count_tier(&mut next, verdict.result.tier);
    Ok(next)
}

/// Re-activates the corrected plan step and moves the cursor onto it.
pub fn correction_accepted(task: &Task, record: &CorrectionRecord) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.status = TaskStatus::Correcting;
    next.metrics.corrections_accepted += 1;
    if let Some(plan) = next.plan.as_mut() {
        if let Some(position) = plan.steps.iter().position(|step| step.index == record.step_index) {
            plan.steps[position].reactivate(record.corrected_description.clone());
            plan.current_step_index = position;
        }
    }
    Ok(next)
}

pub fn correction_rejected(task: &Task) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.metrics.corrections_rejected += 1;
    Ok(next)
}

/// Completes the cursor's step and activates the following one.
pub fn step_completed(task: &Task) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    if let Some(plan) = next.plan.as_mut() {
        activate_current(plan)?;
        if let Some(step) = plan.current_step_mut() {
            step.transition(StepStatus::Completed)?;
            plan.current_step_index += 1;
        }
        activate_current(plan)?;
    }
    Ok(next)
}

/// Closes the current sub-task, merges its outputs and opens the next one.
pub fn sub_task_completed(task: &Task, outputs: BTreeMap<String, String>) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    if let Some(hierarchy) = next.hierarchy.as_mut() {
        if let Some(current) = hierarchy.current_mut() {
            current.status = SubTaskStatus::Completed;
        }
        hierarchy.accumulated_outputs.extend(outputs);
        hierarchy.current_sub_task += 1;
        if let Some(upcoming) = hierarchy.current_mut() {
            upcoming.status = SubTaskStatus::Active;
        }
    }
    Ok(next)
}

pub fn clarification_requested(task: &Task, question: impl Into<String>) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.pending_clarification = Some(question.into());
    Ok(next)
}

/// A user message answers any open question; the message is kept as context.
pub fn clarification_answered(task: &Task, message: &str) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    if next.pending_clarification.take().is_some() {
        next.context_notes.push(format!("User answered: {}", message.trim()));
    }
    Ok(next)
}

pub fn context_noted(task: &Task, notes: Vec<String>) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    for note in notes {
        if !next.context_notes.contains(&note) {
            next.context_notes.push(note);
        }
    }
    Ok(next)
}

/// Low-confidence completion held open until the goal is confirmed.
pub fn confirmation_requested(task: &Task) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    next.pending_confirmation = true;
    Ok(next)
}

pub fn task_completed(task: &Task) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    if let Some(plan) = next.plan.as_mut() {
        if let Some(step) = plan.current_step_mut() {
            if step.status == StepStatus::Active {
                step.transition(StepStatus::Completed)?;
            }
        }
    }
    if let Some(hierarchy) = next.hierarchy.as_mut() {
        if let Some(current) = hierarchy.current_mut() {
            current.status = SubTaskStatus::Completed;
        }
    }
    next.status = TaskStatus::Completed;
    next.awaiting_verification = None;
    next.pending_confirmation = false;
    next.pending_clarification = None;
    Ok(next)
}

pub fn terminal_failure(task: &Task, reason: impl Into<String>) -> Result<Task, TransitionError> {
    let mut next = next_snapshot(task)?;
    if let Some(plan) = next.plan.as_mut() {
        if let Some(step) = plan.current_step_mut() {
            if !step.status.is_done() {
                step.transition(StepStatus::Failed)?;
            }
        }
    }
    if let Some(hierarchy) = next.hierarchy.as_mut() {
        if let Some(current) = hierarchy.current_mut() {
            current.status = SubTaskStatus::Failed;
        }
    }
    next.status = TaskStatus::Failed;
    next.awaiting_verification = None;
    next.failure_reason = Some(reason.into());
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use waypoint_core_types::{
        CorrectionStrategy, PlanStep, SubTask, TaskId, VerificationResult,
    };

    use crate::config::EngineConfig;
    use crate::verification::route;

    fn planned_task() -> Task {
        let plan = Plan::new(vec![
            PlanStep::new(0, "Open search"),
            PlanStep::new(1, "Type query"),
            PlanStep::new(2, "Press Enter"),
        ]);
        let hierarchy = HierarchicalPlan {
            goal: "search".into(),
            is_decomposed: false,
            sub_tasks: vec![SubTask {
                id: "st-1".into(),
                goal: "search".into(),
                step_indices: vec![0, 1, 2],
                inputs: vec![],
                outputs: vec![],
                status: SubTaskStatus::Active,
            }],
            current_sub_task: 0,
            accumulated_outputs: BTreeMap::new(),
        };
        plan_created(&Task::new("search", None), plan, hierarchy).unwrap()
    }

    fn verdict(succeeded: bool) -> RoutedVerification {
        route(
            VerificationResult::new(succeeded, false, 0.9, "r", VerificationTier::Full),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn transitions_leave_input_untouched() {
        let task = planned_task();
        let next = action_issued(&task, 0).unwrap();
        assert_eq!(task.next_step_index, 0);
        assert_eq!(next.next_step_index, 1);
        assert_eq!(next.awaiting_verification, Some(0));
        assert_eq!(next.status, TaskStatus::Executing);
        assert_eq!(next.complexity, task.complexity);
    }

    #[test]
    fn failures_accumulate_and_success_resets() {
        let task = planned_task();
        let once = verification_failed(&task, &verdict(false)).unwrap();
        let twice = verification_failed(&once, &verdict(false)).unwrap();
        assert_eq!(twice.consecutive_failures, 2);
        let reset = verification_succeeded(&twice, &verdict(true)).unwrap();
        assert_eq!(reset.consecutive_failures, 0);
        assert_eq!(reset.metrics.full_verdicts, 3);
    }

    #[test]
    fn step_completion_advances_cursor() {
        let task = step_completed(&planned_task()).unwrap();
        let plan = task.plan.unwrap();
        assert_eq!(plan.current_step_index, 1);
        assert_eq!(plan.steps[0].status, StepStatus::Completed);
        assert_eq!(plan.steps[1].status, StepStatus::Active);
    }

    #[test]
    fn correction_reactivates_step() {
        let task = planned_task();
        let record = CorrectionRecord {
            task_id: TaskId::from("t"),
            step_index: 0,
            strategy: CorrectionStrategy::AlternativeSelector,
            attempt: 1,
            reason: "r".into(),
            original_action: "click(1)".into(),
            original_description: "Open search".into(),
            corrected_action: "click(2)".into(),
            corrected_description: "Open the search icon".into(),
            created_at: Utc::now(),
        };
        let next = correction_accepted(&task, &record).unwrap();
        assert_eq!(next.status, TaskStatus::Correcting);
        assert_eq!(next.plan.unwrap().steps[0].description, "Open the search icon");
        let recovered = verification_succeeded(&correction_accepted(&task, &record).unwrap(), &verdict(true)).unwrap();
        assert_eq!(recovered.status, TaskStatus::Executing);
    }

    #[test]
    fn sub_task_outputs_accumulate() {
        let mut outputs = BTreeMap::new();
        outputs.insert("order_id".to_string(), "A-1234".to_string());
        let next = sub_task_completed(&planned_task(), outputs).unwrap();
        let hierarchy = next.hierarchy.unwrap();
        assert_eq!(hierarchy.current_sub_task, 1);
        assert_eq!(hierarchy.accumulated_outputs["order_id"], "A-1234");
        assert_eq!(hierarchy.sub_tasks[0].status, SubTaskStatus::Completed);
    }

    #[test]
    fn terminal_tasks_reject_events() {
        let failed = terminal_failure(&planned_task(), "breaker").unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.plan.as_ref().unwrap().steps[0].status, StepStatus::Failed);
        assert_eq!(
            action_issued(&failed, 3).unwrap_err(),
            TransitionError::TerminalTask(TaskStatus::Failed)
        );
        assert!(task_completed(&failed).is_err());
    }

    #[test]
    fn completion_closes_current_step() {
        let done = task_completed(&planned_task()).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.plan.unwrap().steps[0].status, StepStatus::Completed);
    }
}
