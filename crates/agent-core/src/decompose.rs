//! Hierarchical decomposition of long plans into sub-tasks, and output
//! extraction when a sub-task completes.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use waypoint_core_types::{
    HierarchicalPlan, InputSource, Plan, PlanStep, SubTask, SubTaskInput, SubTaskOutput,
    SubTaskStatus,
};

use crate::config::EngineConfig;
use crate::errors::AgentError;
use crate::prompt::{format_known_values, DECOMPOSER_SYSTEM_PROMPT};
use crate::provider::{CallPurpose, GenerationRequest, ResponseSchema, TextGenerator};
use crate::structured::generate_structured;

const MIN_SUB_TASK_STEPS: usize = 3;
const MAX_SUB_TASK_STEPS: usize = 7;
const FALLBACK_CHUNK_STEPS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhaseCategory {
    Search,
    Create,
    Fill,
    Submit,
    Confirm,
    Verify,
    Schedule,
    Complete,
}

impl PhaseCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            PhaseCategory::Search => "search",
            PhaseCategory::Create => "create",
            PhaseCategory::Fill => "fill",
            PhaseCategory::Submit => "submit",
            PhaseCategory::Confirm => "confirm",
            PhaseCategory::Verify => "verify",
            PhaseCategory::Schedule => "schedule",
            PhaseCategory::Complete => "complete",
        }
    }

    /// Output a sub-task in this phase is expected to produce.
    fn output(self) -> SubTaskOutput {
        let (name, hint) = match self {
            PhaseCategory::Search => ("search_result_url", "url"),
            PhaseCategory::Create => ("created_record_id", "id"),
            PhaseCategory::Fill => ("form_status", "success"),
            PhaseCategory::Submit => ("submission_reference", "reference"),
            PhaseCategory::Confirm => ("confirmation_number", "number"),
            PhaseCategory::Verify => ("verification_status", "success"),
            PhaseCategory::Schedule => ("booking_reference", "reference"),
            PhaseCategory::Complete => ("completion_status", "success"),
        };
        SubTaskOutput {
            name: name.to_string(),
            extraction_hint: hint.to_string(),
        }
    }
}

const PHASE_KEYWORDS: &[(PhaseCategory, &[&str])] = &[
    (PhaseCategory::Search, &["search", "find", "look up", "lookup", "browse", "filter"]),
    (PhaseCategory::Create, &["create", "add", "new", "register", "sign up"]),
    (PhaseCategory::Fill, &["fill", "type", "enter", "input"]),
    (PhaseCategory::Submit, &["submit", "send", "place order", "pay", "checkout"]),
    (PhaseCategory::Confirm, &["confirm", "accept", "approve"]),
    (PhaseCategory::Verify, &["verify", "check", "ensure", "validate", "review"]),
    (PhaseCategory::Schedule, &["schedule", "book", "reserve", "appointment"]),
    (PhaseCategory::Complete, &["complete", "finish", "finalize", "done"]),
];

fn padded_words(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

pub fn phase_categories(text: &str) -> Vec<PhaseCategory> {
    let padded = padded_words(text);
    PHASE_KEYWORDS
        .iter()
        .filter(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| padded.contains(&format!(" {keyword} ")))
        })
        .map(|(category, _)| *category)
        .collect()
}

/// Distinct categories across the steps, in first-seen order.
pub fn plan_categories(steps: &[PlanStep]) -> Vec<PhaseCategory> {
    let mut seen = Vec::new();
    for step in steps {
        for category in phase_categories(&step.description) {
            if !seen.contains(&category) {
                seen.push(category);
            }
        }
    }
    seen
}

#[derive(Debug, Clone, Copy)]
pub struct DecompositionPolicy {
    pub step_threshold: usize,
    pub category_threshold: usize,
}

impl DecompositionPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            step_threshold: config.decomposition_step_threshold,
            category_threshold: config.phase_category_threshold,
        }
    }
}

type Trigger = fn(&[PlanStep], &DecompositionPolicy) -> bool;

fn too_many_steps(steps: &[PlanStep], policy: &DecompositionPolicy) -> bool {
    steps.len() > policy.step_threshold
}

fn many_phases(steps: &[PlanStep], policy: &DecompositionPolicy) -> bool {
    plan_categories(steps).len() >= policy.category_threshold
}

const DECOMPOSITION_TRIGGERS: &[(&str, Trigger)] = &[
    ("step_count", too_many_steps),
    ("phase_categories", many_phases),
];

/// Name of the first trigger that fires.
pub fn decomposition_trigger(steps: &[PlanStep], policy: &DecompositionPolicy) -> Option<&'static str> {
    DECOMPOSITION_TRIGGERS
        .iter()
        .find(|(_, trigger)| trigger(steps, policy))
        .map(|(name, _)| *name)
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProposedInput {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProposedOutput {
    pub name: String,
    #[serde(default, alias = "extraction_hint")]
    pub extraction_hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProposedSubTask {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub goal: String,
    #[serde(alias = "step_indices")]
    pub step_indices: Vec<u32>,
    #[serde(default)]
    pub inputs: Vec<ProposedInput>,
    #[serde(default)]
    pub outputs: Vec<ProposedOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DecompositionResponse {
    #[serde(alias = "sub_tasks")]
    pub sub_tasks: Vec<ProposedSubTask>,
}

/// Checks a manager proposal: contiguous ranges covering every step in
/// order, 3..=7 steps each (fewer only for plans shorter than three) and
/// input sources that are the user or an earlier sub-task.
pub fn validate_proposal(proposal: DecompositionResponse, step_count: usize) -> Result<Vec<SubTask>, String> {
    if proposal.sub_tasks.is_empty() {
        return Err("no sub-tasks proposed".to_string());
    }
    let min_size = MIN_SUB_TASK_STEPS.min(step_count);
    let mut expected_next = 0u32;
    let mut seen_ids: Vec<String> = Vec::new();
    let mut sub_tasks = Vec::with_capacity(proposal.sub_tasks.len());
    for (position, proposed) in proposal.sub_tasks.into_iter().enumerate() {
        let size = proposed.step_indices.len();
        if size < min_size || size > MAX_SUB_TASK_STEPS {
            return Err(format!("sub-task {} owns {size} steps", position + 1));
        }
        for index in &proposed.step_indices {
            if *index != expected_next {
                return Err(format!(
                    "sub-task {} is not contiguous: expected step {expected_next}, got {index}",
                    position + 1
                ));
            }
            expected_next += 1;
        }
        let id = if proposed.id.trim().is_empty() {
            format!("st-{}", position + 1)
        } else {
            proposed.id.trim().to_string()
        };
        if seen_ids.contains(&id) {
            return Err(format!("duplicate sub-task id {id}"));
        }
        let mut inputs = Vec::with_capacity(proposed.inputs.len());
        for input in proposed.inputs {
            let source = match input.source.trim() {
                "" | "user" | "USER" => InputSource::User,
                other if seen_ids.iter().any(|seen| seen == other) => {
                    InputSource::SubTask(other.to_string())
                }
                other => {
                    return Err(format!(
                        "input {} of {id} comes from unknown or later sub-task {other}",
                        input.name
                    ))
                }
            };
            inputs.push(SubTaskInput {
                name: input.name,
                required: input.required,
                source,
            });
        }
        let outputs = proposed
            .outputs
            .into_iter()
            .map(|output| SubTaskOutput {
                extraction_hint: if output.extraction_hint.is_empty() {
                    output.name.clone()
                } else {
                    output.extraction_hint
                },
                name: output.name,
            })
            .collect();
        seen_ids.push(id.clone());
        sub_tasks.push(SubTask {
            id,
            goal: proposed.goal,
            step_indices: proposed.step_indices,
            inputs,
            outputs,
            status: SubTaskStatus::Pending,
        });
    }
    if expected_next as usize != step_count {
        return Err(format!(
            "sub-tasks cover {expected_next} of {step_count} steps"
        ));
    }
    Ok(sub_tasks)
}

/// Balanced contiguous chunks of at most five steps; 7 steps become 4 + 3.
pub fn chunk_sizes(step_count: usize) -> Vec<usize> {
    if step_count == 0 {
        return Vec::new();
    }
    let chunks = step_count.div_ceil(FALLBACK_CHUNK_STEPS);
    let base = step_count / chunks;
    let remainder = step_count % chunks;
    (0..chunks)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

/// Deterministic decomposition used when the manager call fails or its
/// proposal is invalid.
pub fn fallback_sub_tasks(steps: &[PlanStep]) -> Vec<SubTask> {
    let mut sub_tasks: Vec<SubTask> = Vec::new();
    let mut offset = 0;
    for (position, size) in chunk_sizes(steps.len()).into_iter().enumerate() {
        let chunk = &steps[offset..offset + size];
        offset += size;
        let id = format!("st-{}", position + 1);

        let mut outputs: Vec<SubTaskOutput> = plan_categories(chunk)
            .into_iter()
            .map(PhaseCategory::output)
            .collect();
        outputs.dedup_by(|a, b| a.name == b.name);
        if outputs.is_empty() {
            outputs.push(SubTaskOutput {
                name: format!("{}_result", id.replace('-', "_")),
                extraction_hint: "success".to_string(),
            });
        }
        let inputs = sub_tasks
            .last()
            .map(|previous| {
                previous
                    .outputs
                    .iter()
                    .map(|output| SubTaskInput {
                        name: output.name.clone(),
                        required: true,
                        source: InputSource::SubTask(previous.id.clone()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        let goal = chunk
            .iter()
            .map(|step| step.description.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        sub_tasks.push(SubTask {
            id,
            goal,
            step_indices: chunk.iter().map(|step| step.index).collect(),
            inputs,
            outputs,
            status: SubTaskStatus::Pending,
        });
    }
    sub_tasks
}

fn wrap(goal: &str, mut sub_tasks: Vec<SubTask>, is_decomposed: bool) -> HierarchicalPlan {
    if let Some(first) = sub_tasks.first_mut() {
        first.status = SubTaskStatus::Active;
    }
    HierarchicalPlan {
        goal: goal.to_string(),
        is_decomposed,
        sub_tasks,
        current_sub_task: 0,
        accumulated_outputs: BTreeMap::new(),
    }
}

#[derive(Debug, Clone)]
pub struct HierarchicalDecomposer {
    policy: DecompositionPolicy,
}

impl HierarchicalDecomposer {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            policy: DecompositionPolicy::from_config(config),
        }
    }

    pub async fn decompose(
        &self,
        goal: &str,
        plan: &Plan,
        generator: &dyn TextGenerator,
    ) -> HierarchicalPlan {
        let Some(trigger) = decomposition_trigger(&plan.steps, &self.policy) else {
            let single = SubTask {
                id: "st-1".to_string(),
                goal: goal.to_string(),
                step_indices: plan.steps.iter().map(|step| step.index).collect(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                status: SubTaskStatus::Pending,
            };
            return wrap(goal, vec![single], false);
        };

        info!(target: "planning", trigger, steps = plan.len(), "decomposing plan");
        let sub_tasks = match self.propose(goal, plan, generator).await {
            Ok(proposal) => match validate_proposal(proposal, plan.len()) {
                Ok(sub_tasks) => sub_tasks,
                Err(reason) => {
                    warn!(target: "planning", %reason, "decomposition rejected; chunking deterministically");
                    fallback_sub_tasks(&plan.steps)
                }
            },
            Err(err) => {
                warn!(target: "planning", kind = err.kind(), error = %err, "decomposition failed; chunking deterministically");
                fallback_sub_tasks(&plan.steps)
            }
        };
        info!(target: "planning", sub_tasks = sub_tasks.len(), "plan decomposed");
        wrap(goal, sub_tasks, true)
    }

    async fn propose(
        &self,
        goal: &str,
        plan: &Plan,
        generator: &dyn TextGenerator,
    ) -> Result<DecompositionResponse, AgentError> {
        let mut prompt = format!("Goal: {goal}\nPlan:\n");
        for step in &plan.steps {
            prompt.push_str(&format!("{}. {}\n", step.index, step.description));
        }
        let request = GenerationRequest::new(CallPurpose::Decomposition, DECOMPOSER_SYSTEM_PROMPT, prompt)
            .with_schema(ResponseSchema::of::<DecompositionResponse>("decomposition"))
            .with_temperature(0.2);
        generate_structured(generator, request).await
    }
}

static ID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:order|confirmation|booking|reservation|reference|ref|ticket|record|id|number|no\.?|code)\s*(?:number|no\.?|id)?\s*[:#]?\s*#?([A-Z0-9][A-Z0-9-]{3,})",
    )
    .expect("id pattern regex")
});

static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s"'<>)\]]+"#).expect("url pattern regex"));

const SUCCESS_KEYWORDS: &[&str] = &[
    "successfully",
    "success",
    "confirmed",
    "completed",
    "thank you",
    "submitted",
    "booked",
    "scheduled",
    "saved",
];

type Extractor = fn(&str) -> Option<String>;
type HintPredicate = fn(&str) -> bool;

fn extract_id(evidence: &str) -> Option<String> {
    ID_PATTERN
        .captures_iter(evidence)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .find(|candidate| candidate.chars().any(|c| c.is_ascii_digit()))
}

fn extract_url(evidence: &str) -> Option<String> {
    URL_PATTERN
        .find(evidence)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';']).to_string())
}

fn extract_success_line(evidence: &str) -> Option<String> {
    evidence.lines().map(str::trim).find_map(|line| {
        let lower = line.to_lowercase();
        SUCCESS_KEYWORDS
            .iter()
            .any(|keyword| lower.contains(keyword))
            .then(|| line.chars().take(200).collect())
    })
}

fn wants_id(hint: &str) -> bool {
    ["id", "number", "reference", "code", "confirmation"]
        .iter()
        .any(|key| hint.contains(key))
}

fn wants_url(hint: &str) -> bool {
    ["url", "link", "page"].iter().any(|key| hint.contains(key))
}

fn any_hint(_hint: &str) -> bool {
    true
}

const EXTRACTION_HEURISTICS: &[(&str, HintPredicate, Extractor)] = &[
    ("id_pattern", wants_id, extract_id),
    ("url_match", wants_url, extract_url),
    ("success_keyword", any_hint, extract_success_line),
];

/// Extracts each declared output from the completion evidence. Outputs with
/// no match are left out.
pub fn extract_outputs(sub_task: &SubTask, evidence: &str) -> BTreeMap<String, String> {
    let mut extracted = BTreeMap::new();
    for output in &sub_task.outputs {
        let hint = output.extraction_hint.to_lowercase();
        let Some((name, _, extractor)) = EXTRACTION_HEURISTICS
            .iter()
            .find(|(_, applies, _)| applies(&hint))
        else {
            continue;
        };
        match extractor(evidence) {
            Some(value) => {
                tracing::debug!(target: "planning", output = %output.name, heuristic = *name, "extracted sub-task output");
                extracted.insert(output.name.clone(), value);
            }
            None => {
                tracing::debug!(target: "planning", output = %output.name, heuristic = *name, "no value for sub-task output");
            }
        }
    }
    extracted
}

/// Prompt section for the current sub-task: its goal plus the accumulated
/// outputs of earlier sub-tasks, nothing else.
pub fn sub_task_context(hierarchy: &HierarchicalPlan) -> String {
    let Some(current) = hierarchy.current() else {
        return String::new();
    };
    if !hierarchy.is_decomposed {
        return format_known_values(&hierarchy.accumulated_outputs);
    }
    let mut out = format!(
        "Current sub-task ({} of {}): {}\n",
        hierarchy.current_sub_task + 1,
        hierarchy.sub_tasks.len(),
        current.goal
    );
    out.push_str(&format_known_values(&hierarchy.accumulated_outputs));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockTextGenerator;

    fn steps(descriptions: &[&str]) -> Vec<PlanStep> {
        descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| PlanStep::new(i as u32, *d))
            .collect()
    }

    fn seven_step_plan() -> Plan {
        Plan::new(steps(&[
            "Search for a dentist near the office",
            "Open the first result",
            "Fill the patient name",
            "Fill the phone number",
            "Submit the booking form",
            "Confirm the appointment details",
            "Schedule a reminder",
        ]))
    }

    #[test]
    fn short_plan_with_few_phases_is_not_decomposed() {
        let policy = DecompositionPolicy::from_config(&EngineConfig::default());
        let plan = steps(&["Open the pricing page", "Click the Pro plan"]);
        assert_eq!(decomposition_trigger(&plan, &policy), None);
    }

    #[test]
    fn three_phases_trigger_on_short_plan() {
        let policy = DecompositionPolicy::from_config(&EngineConfig::default());
        let plan = steps(&["Search for flights", "Fill passenger details", "Submit payment"]);
        assert_eq!(decomposition_trigger(&plan, &policy), Some("phase_categories"));
    }

    #[test]
    fn chunking_is_balanced() {
        assert_eq!(chunk_sizes(7), vec![4, 3]);
        assert_eq!(chunk_sizes(5), vec![5]);
        assert_eq!(chunk_sizes(11), vec![4, 4, 3]);
    }

    #[test]
    fn fallback_links_inputs_to_previous_outputs() {
        let plan = seven_step_plan();
        let sub_tasks = fallback_sub_tasks(&plan.steps);
        assert_eq!(sub_tasks.len(), 2);
        assert_eq!(sub_tasks[0].step_indices, vec![0, 1, 2, 3]);
        assert!(sub_tasks[0].inputs.is_empty());
        assert!(!sub_tasks[1].inputs.is_empty());
        assert!(sub_tasks[1]
            .inputs
            .iter()
            .all(|input| input.source == InputSource::SubTask("st-1".into())));
    }

    #[test]
    fn proposal_must_cover_contiguously() {
        let gap: DecompositionResponse = serde_json::from_str(
            r#"{"subTasks":[{"id":"a","goal":"g","stepIndices":[0,1,2]},{"id":"b","goal":"g","stepIndices":[4,5,6]}]}"#,
        )
        .unwrap();
        assert!(validate_proposal(gap, 7).is_err());

        let forward_ref: DecompositionResponse = serde_json::from_str(
            r#"{"subTasks":[{"id":"a","goal":"g","stepIndices":[0,1,2],"inputs":[{"name":"x","source":"b"}]},{"id":"b","goal":"g","stepIndices":[3,4,5,6]}]}"#,
        )
        .unwrap();
        assert!(validate_proposal(forward_ref, 7).is_err());

        let good: DecompositionResponse = serde_json::from_str(
            r#"{"subTasks":[{"id":"a","goal":"g","stepIndices":[0,1,2]},{"id":"b","goal":"g","stepIndices":[3,4,5,6],"inputs":[{"name":"x","required":true,"source":"a"}]}]}"#,
        )
        .unwrap();
        let sub_tasks = validate_proposal(good, 7).unwrap();
        assert_eq!(sub_tasks[1].inputs[0].source, InputSource::SubTask("a".into()));
    }

    #[tokio::test]
    async fn seven_step_plan_falls_back_to_two_sub_tasks() {
        let mock = MockTextGenerator::new();
        mock.push(CallPurpose::Decomposition, "not json at all");
        let hierarchy = HierarchicalDecomposer::new(&EngineConfig::default())
            .decompose("book a dentist", &seven_step_plan(), &mock)
            .await;
        assert!(hierarchy.is_decomposed);
        assert!(hierarchy.sub_tasks.len() >= 2);
        assert_eq!(hierarchy.sub_tasks[0].status, SubTaskStatus::Active);
    }

    #[tokio::test]
    async fn simple_plan_gets_one_wrapping_sub_task() {
        let mock = MockTextGenerator::new();
        let plan = Plan::new(steps(&["Open the pricing page"]));
        let hierarchy = HierarchicalDecomposer::new(&EngineConfig::default())
            .decompose("see pricing", &plan, &mock)
            .await;
        assert!(!hierarchy.is_decomposed);
        assert_eq!(hierarchy.sub_tasks.len(), 1);
        assert_eq!(mock.total_calls(), 0);
    }

    #[test]
    fn extraction_follows_hint() {
        let sub_task = SubTask {
            id: "st-1".into(),
            goal: "g".into(),
            step_indices: vec![0],
            inputs: vec![],
            outputs: vec![
                SubTaskOutput { name: "confirmation_number".into(), extraction_hint: "number".into() },
                SubTaskOutput { name: "page".into(), extraction_hint: "url".into() },
                SubTaskOutput { name: "status".into(), extraction_hint: "success".into() },
            ],
            status: SubTaskStatus::Active,
        };
        let evidence = "Booking confirmed!\nConfirmation number: AB-12345\nSee https://clinic.example/appointments/9.";
        let outputs = extract_outputs(&sub_task, evidence);
        assert_eq!(outputs["confirmation_number"], "AB-12345");
        assert_eq!(outputs["page"], "https://clinic.example/appointments/9");
        assert_eq!(outputs["status"], "Booking confirmed!");
    }
}
