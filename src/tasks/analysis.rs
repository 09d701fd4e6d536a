//! Failure diagnostics for one task and pattern analysis across many.
//!
//! Error categorization is driven by [`ERROR_CATEGORY_RULES`]: the raw
//! output is lowercased and the first rule with a matching keyword wins.
//! Adding a category means adding a row to the table.

use super::models::{Project, Task, TaskStatus, Template};
use super::query::FilterRequest;
use super::TaskService;
use crate::error::{Result, ResultExt};
use crate::gateway::GatewayResult;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Default number of failed tasks examined by `bulk_analyze_failures`.
pub const DEFAULT_BULK_ANALYSIS_LIMIT: usize = 5;

/// Maps keywords found in task output to an error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorCategoryRule {
    /// Category name reported in the analysis.
    pub category: &'static str,
    /// Lowercase substrings that select this category.
    pub keywords: &'static [&'static str],
    /// Advice given when the category shows up.
    #[serde(skip)]
    pub recommendation: &'static str,
}

/// Categorization rules, checked in order.
pub const ERROR_CATEGORY_RULES: &[ErrorCategoryRule] = &[
    ErrorCategoryRule {
        category: "connection_error",
        keywords: &[
            "connection",
            "timeout",
            "timed out",
            "unreachable",
            "refused",
            "no route to host",
        ],
        recommendation: "Check network connectivity, SSH reachability and firewall rules \
                         between the runner and the target hosts",
    },
    ErrorCategoryRule {
        category: "auth_error",
        keywords: &[
            "authentication",
            "permission denied",
            "unauthorized",
            "access denied",
            "auth failed",
            "invalid credentials",
        ],
        recommendation: "Verify the access keys, become passwords and user permissions \
                         used by the failing templates",
    },
    ErrorCategoryRule {
        category: "syntax_error",
        keywords: &["syntax error", "syntax", "yaml", "parse error"],
        recommendation: "Lint the playbooks and variable files (ansible-playbook --syntax-check) \
                         before rerunning",
    },
];

const FOCUS_AREAS: &[&str] = &[
    "Error messages near the end of the raw output",
    "Failed or unreachable hosts in the play recap",
    "Authentication and permission problems",
    "Syntax or templating errors in playbooks and variables",
    "Environment variables and inventory passed to the task",
];

/// Category of the first rule whose keyword appears in `output`.
pub fn categorize_output(output: &str) -> Option<&'static str> {
    let lowered = output.to_lowercase();
    ERROR_CATEGORY_RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|keyword| lowered.contains(keyword)))
        .map(|rule| rule.category)
}

/// Outputs collected for a failed task.
#[derive(Debug, Clone, Serialize)]
pub struct FailureOutputs {
    /// Plain-text log, when retrievable.
    pub raw: Option<String>,
    /// Structured output lines, when retrievable.
    pub structured: Option<Value>,
    /// Whether `raw` was retrieved.
    pub has_raw_output: bool,
    /// Whether `structured` was retrieved.
    pub has_structured_output: bool,
}

/// Fixed rubric for reading a failure.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisGuidance {
    /// Where to look in the output.
    pub focus_areas: &'static [&'static str],
    /// Known error signatures.
    pub common_failure_patterns: &'static [ErrorCategoryRule],
    /// Suggested follow-up calls.
    pub next_steps: Vec<String>,
}

/// Diagnostic bundle for one failed task.
#[derive(Debug, Clone, Serialize)]
pub struct FailureAnalysis {
    /// Always true.
    pub analysis_ready: bool,
    /// The failed task.
    pub task_details: Task,
    /// The owning project, if found in the project list.
    pub project_context: Option<Project>,
    /// The task's template, if it could be fetched.
    pub template_context: Option<Template>,
    /// Collected outputs.
    pub outputs: FailureOutputs,
    /// How to read them.
    pub analysis_guidance: AnalysisGuidance,
    /// Lookups that failed while building the bundle.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_errors: Vec<String>,
}

/// Returned when the task is not in `error`.
#[derive(Debug, Clone, Serialize)]
pub struct NotApplicable {
    /// Explanation.
    pub warning: String,
    /// Always false.
    pub analysis_applicable: bool,
    /// The task's actual status.
    pub task_status: String,
}

/// Result of `analyze_task_failure`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FailureAnalysisOutcome {
    /// The task failed and a bundle was assembled.
    Ready(Box<FailureAnalysis>),
    /// The task did not fail.
    NotApplicable(NotApplicable),
}

/// Per-task line of a bulk analysis.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    /// Task id.
    pub task_id: i64,
    /// Template name, if it could be fetched.
    pub template_name: Option<String>,
    /// Matched error category.
    pub error_category: Option<&'static str>,
    /// Creation timestamp as reported.
    pub created: Option<String>,
    /// Whether raw output was available.
    pub has_raw_output: bool,
}

/// Patterns across several failed tasks.
#[derive(Debug, Clone, Serialize)]
pub struct BulkAnalysis {
    /// Always true.
    pub bulk_analysis_complete: bool,
    /// Tasks whose failure bundle was assembled.
    pub analyzed_tasks: usize,
    /// Failed tasks found before the limit.
    pub total_failed_tasks: usize,
    /// Failures per template name; tasks without a fetched template are left out.
    pub template_failure_breakdown: BTreeMap<String, usize>,
    /// Failures per error category.
    pub error_pattern_analysis: BTreeMap<String, usize>,
    /// Failures matching no category.
    pub uncategorized_failures: usize,
    /// Derived observations.
    pub insights: Vec<String>,
    /// Advice keyed by the categories seen.
    pub recommendations: Vec<String>,
    /// One line per analyzed task.
    pub task_summaries: Vec<TaskSummary>,
    /// Tasks that could not be analyzed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub analysis_errors: Vec<String>,
}

/// Result of `bulk_analyze_failures`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BulkAnalysisOutcome {
    /// There was nothing to analyze.
    NoFailures {
        /// Explanation.
        message: String,
        /// Always zero.
        failed_task_count: usize,
    },
    /// Aggregated analysis.
    Complete(Box<BulkAnalysis>),
}

fn best_effort<T>(result: GatewayResult<T>, what: &str, errors: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            errors.push(format!("{what}: {err}"));
            None
        }
    }
}

/// Fold per-task bundles into a bulk analysis.
pub fn summarize_failures(
    analyses: &[FailureAnalysis],
    total_failed_tasks: usize,
    analysis_errors: Vec<String>,
) -> BulkAnalysis {
    let analyzed = analyses.len();
    let mut template_failure_breakdown: BTreeMap<String, usize> = BTreeMap::new();
    let mut error_pattern_analysis: BTreeMap<String, usize> = BTreeMap::new();
    let mut uncategorized_failures = 0;
    let mut task_summaries = Vec::with_capacity(analyzed);

    for analysis in analyses {
        let template_name = analysis.template_context.as_ref().map(|t| t.name.clone());
        if let Some(name) = &template_name {
            *template_failure_breakdown.entry(name.clone()).or_insert(0) += 1;
        }
        let error_category = analysis.outputs.raw.as_deref().and_then(categorize_output);
        match error_category {
            Some(category) => *error_pattern_analysis.entry(category.to_string()).or_insert(0) += 1,
            None => uncategorized_failures += 1,
        }
        task_summaries.push(TaskSummary {
            task_id: analysis.task_details.id,
            template_name,
            error_category,
            created: analysis.task_details.created.clone(),
            has_raw_output: analysis.outputs.has_raw_output,
        });
    }

    let mut shared: Vec<(&String, &usize)> =
        template_failure_breakdown.iter().filter(|(_, count)| **count > 1).collect();
    shared.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));

    let mut insights: Vec<String> = shared
        .iter()
        .map(|(name, count)| format!("{count} of {analyzed} failures share template '{name}'"))
        .collect();
    for (category, count) in &error_pattern_analysis {
        if *count > 1 {
            insights.push(format!("{count} of {analyzed} failures match the {category} pattern"));
        }
    }
    let unattributed = analyzed - template_failure_breakdown.values().sum::<usize>();
    if unattributed > 0 {
        insights.push(format!("{unattributed} failures could not be attributed to a template"));
    }
    if insights.is_empty() && analyzed > 0 {
        insights.push(
            "No recurring template or error pattern among the analyzed failures".to_string(),
        );
    }

    let mut recommendations: Vec<String> = ERROR_CATEGORY_RULES
        .iter()
        .filter(|rule| error_pattern_analysis.contains_key(rule.category))
        .map(|rule| rule.recommendation.to_string())
        .collect();
    if let Some((name, _)) = shared.first() {
        recommendations.push(format!("Start with template '{name}', it fails most often"));
    }
    if uncategorized_failures > 0 {
        recommendations.push(
            "Read the raw output of uncategorized failures with get_task_raw_output".to_string(),
        );
    }

    BulkAnalysis {
        bulk_analysis_complete: true,
        analyzed_tasks: analyzed,
        total_failed_tasks,
        template_failure_breakdown,
        error_pattern_analysis,
        uncategorized_failures,
        insights,
        recommendations,
        task_summaries,
        analysis_errors,
    }
}

impl TaskService {
    /// Assemble a diagnostic bundle for a failed task.
    ///
    /// Tasks not in `error` get a warning and no further remote calls.
    /// Template, project and output lookups are best effort; their failures
    /// are listed in `context_errors`.
    ///
    /// # Errors
    ///
    /// Returns an error if the task itself cannot be fetched.
    pub async fn analyze_task_failure(
        &self,
        project_id: i64,
        task_id: i64,
    ) -> Result<FailureAnalysisOutcome> {
        let task = self
            .gateway
            .get_task(project_id, task_id)
            .await
            .during(|| format!("analyzing failure of task {task_id}"))?;

        if task.status != TaskStatus::Error {
            return Ok(FailureAnalysisOutcome::NotApplicable(NotApplicable {
                warning: format!(
                    "Task {task_id} has status '{}', not 'error'. \
                     Failure analysis only applies to failed tasks.",
                    task.status
                ),
                analysis_applicable: false,
                task_status: task.status.to_string(),
            }));
        }

        let gateway = &self.gateway;
        let template_lookup = async {
            match task.template_id {
                Some(template_id) => Some(gateway.get_template(project_id, template_id).await),
                None => None,
            }
        };
        let (template, projects, raw, structured) = tokio::join!(
            template_lookup,
            gateway.list_projects(),
            gateway.get_task_raw_output(project_id, task_id),
            gateway.get_task_output(project_id, task_id),
        );

        let mut context_errors = Vec::new();
        let template_context = match template {
            Some(result) => best_effort(result, "template lookup failed", &mut context_errors),
            None => {
                context_errors.push("task has no template_id".to_string());
                None
            }
        };
        let project_context =
            match best_effort(projects, "project lookup failed", &mut context_errors) {
                Some(projects) => {
                    let found = projects.into_iter().find(|p| p.id == project_id);
                    if found.is_none() {
                        context_errors
                            .push(format!("project {project_id} not found in project list"));
                    }
                    found
                }
                None => None,
            };
        let raw = best_effort(raw, "raw output unavailable", &mut context_errors);
        let structured =
            best_effort(structured, "structured output unavailable", &mut context_errors);

        tracing::debug!(
            project_id,
            task_id,
            context_errors = context_errors.len(),
            "assembled failure analysis"
        );

        Ok(FailureAnalysisOutcome::Ready(Box::new(FailureAnalysis {
            analysis_ready: true,
            task_details: task,
            project_context,
            template_context,
            outputs: FailureOutputs {
                has_raw_output: raw.is_some(),
                has_structured_output: structured.is_some(),
                raw,
                structured,
            },
            analysis_guidance: AnalysisGuidance {
                focus_areas: FOCUS_AREAS,
                common_failure_patterns: ERROR_CATEGORY_RULES,
                next_steps: vec![
                    "Read outputs.raw from the end to find the first failing step".to_string(),
                    "Compare the failure with the template's playbook and arguments".to_string(),
                    format!(
                        "Run bulk_analyze_failures(project_id={project_id}) to see whether \
                         the failure repeats"
                    ),
                ],
            },
            context_errors,
        })))
    }

    /// Analyze up to `limit` recent failures of a project for shared causes.
    ///
    /// Tasks are analyzed one after another. A task that cannot be analyzed
    /// is listed in `analysis_errors` and the rest continue.
    ///
    /// # Errors
    ///
    /// Returns an error if the failed tasks cannot be listed.
    pub async fn bulk_analyze_failures(
        &self,
        project_id: i64,
        limit: usize,
    ) -> Result<BulkAnalysisOutcome> {
        let request = FilterRequest::statuses(&["error"]).with_limit(limit);
        let failed = self.filter_tasks(project_id, &request).await?;
        if failed.tasks.is_empty() {
            return Ok(BulkAnalysisOutcome::NoFailures {
                message: "No failed tasks found for analysis".to_string(),
                failed_task_count: 0,
            });
        }

        let mut analyses = Vec::with_capacity(failed.tasks.len());
        let mut analysis_errors = Vec::new();
        for task in &failed.tasks {
            match self.analyze_task_failure(project_id, task.id).await {
                Ok(FailureAnalysisOutcome::Ready(analysis)) => analyses.push(*analysis),
                Ok(FailureAnalysisOutcome::NotApplicable(skipped)) => {
                    analysis_errors.push(format!("task {}: {}", task.id, skipped.warning));
                }
                Err(err) => {
                    tracing::warn!(
                        project_id,
                        task_id = task.id,
                        error = %err,
                        "failure analysis failed"
                    );
                    analysis_errors.push(format!("task {}: {err}", task.id));
                }
            }
        }

        tracing::info!(
            project_id,
            analyzed = analyses.len(),
            skipped = analysis_errors.len(),
            "bulk failure analysis complete"
        );
        Ok(BulkAnalysisOutcome::Complete(Box::new(summarize_failures(
            &analyses,
            failed.statistics.matching_tasks,
            analysis_errors,
        ))))
    }
}
