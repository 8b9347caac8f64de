//! Optimizer
//!
//! Looks back over finished runs and produces per-component improvement
//! suggestions plus descriptive change plans for them. Everything produced here
//! is advisory: nothing in this module changes how another stage behaves.

use crate::config::HistoryConfig;
use crate::llm::structured::{from_value, request_record, request_value};
use crate::llm::{BackendSelection, Gateway};
use sdk::errors::PipelineError;
use sdk::types::{
    ChangeDescriptor, ComponentKind, Context, OptimizationSuggestions, PerformanceAnalysis,
    Suggestion, TaskHistoryRecord, Validate,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const STAGE: &str = "optimizer";

/// Suggestions and change plans for one component
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentOptimization {
    pub component: ComponentKind,
    pub suggestions: Vec<Suggestion>,
    pub changes: BTreeMap<String, ChangeDescriptor>,
}

/// Output of one optimization pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationReport {
    pub analysis: PerformanceAnalysis,
    pub components: Vec<ComponentOptimization>,
}

impl OptimizationReport {
    pub fn suggestion_count(&self) -> usize {
        self.components.iter().map(|c| c.suggestions.len()).sum()
    }
}

pub struct Optimizer {
    gateway: Arc<Gateway>,
    /// Most recent records sent for analysis
    window: usize,
}

impl Optimizer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            window: HistoryConfig::default().analysis_window,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = window.max(1);
        self
    }

    /// Patterns, issues and trends across past runs
    pub async fn analyze_performance(
        &self,
        history: &[TaskHistoryRecord],
        selection: &BackendSelection,
    ) -> Result<PerformanceAnalysis, PipelineError> {
        let recent = &history[history.len().saturating_sub(self.window)..];

        let prompt = format!(
            "Task History: {}\n\n\
            Analyze the performance across these tasks and provide:\n\
            1. Common patterns in successful strategies\n\
            2. Recurring issues or bottlenecks\n\
            3. Trends in performance over time\n\
            4. Potential areas for improvement in planning and reasoning\n\n\
            Respond with a JSON object with keys: 'success_patterns', 'issues', 'trends', and \
            'improvement_areas'.",
            json!(recent)
        );

        tracing::debug!("Analyzing {} of {} history records", recent.len(), history.len());
        request_record(
            &self.gateway,
            STAGE,
            "You are an AI performance analyst. Your job is to identify patterns and suggest improvements based on historical task performance.",
            prompt,
            selection,
        )
        .await
    }

    /// Suggestions for all four components, each paired with its expected impact
    pub async fn generate_optimization_suggestions(
        &self,
        analysis: &PerformanceAnalysis,
        current_task: &str,
        selection: &BackendSelection,
    ) -> Result<OptimizationSuggestions, PipelineError> {
        let prompt = format!(
            "Performance Analysis: {}\nCurrent Task: {}\n\n\
            Based on the performance analysis and the current task, generate suggestions for \
            optimizing:\n\
            1. Planning strategies\n\
            2. Reasoning approaches\n\
            3. Execution methods\n\
            4. Evaluation criteria\n\n\
            For each suggestion, provide a brief explanation of its potential impact.\n\n\
            Respond with a JSON object with keys: 'planning_suggestions', \
            'reasoning_suggestions', 'execution_suggestions', and 'evaluation_suggestions'. Each \
            value is a list of two-element arrays [suggestion, explanation].",
            json!(analysis),
            current_task
        );

        request_record(
            &self.gateway,
            STAGE,
            "You are an AI optimization expert. Your job is to suggest improvements to an AI agent's strategies based on past performance and the current task.",
            prompt,
            selection,
        )
        .await
    }

    /// Describe how each suggestion would be implemented in `component`
    ///
    /// The result is keyed by suggestion and is a description only. No call is
    /// made when there are no suggestions.
    pub async fn apply_optimizations(
        &self,
        component: ComponentKind,
        suggestions: &[Suggestion],
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<BTreeMap<String, ChangeDescriptor>, PipelineError> {
        if suggestions.is_empty() {
            return Ok(BTreeMap::new());
        }

        let prompt = format!(
            "Component: {}\nOptimization Suggestions: {}\nCurrent Context: {}\n\n\
            For each suggestion, determine how to best implement it in the given component. \
            Provide:\n\
            1. A description of the change to be made\n\
            2. The expected impact of the change\n\
            3. Any potential risks or trade-offs\n\n\
            Respond with a JSON object whose keys are the suggestions and whose values are \
            objects with keys 'implementation', 'impact', and 'risks'.",
            component,
            json!(suggestions),
            context
        );

        let raw: Map<String, Value> = request_value(
            &self.gateway,
            STAGE,
            "You are an AI system architect. Your job is to determine how to implement optimization suggestions in specific components of an AI agent.",
            prompt,
            selection,
        )
        .await?;

        let mut changes = BTreeMap::new();
        for (key, value) in raw {
            let change: ChangeDescriptor = from_value(STAGE, value)?;
            change
                .validate()
                .map_err(|detail| PipelineError::schema(STAGE, format!("'{}': {}", key, detail)))?;
            changes.insert(key, change);
        }
        Ok(changes)
    }

    /// Analyze, suggest, then describe changes for one component
    pub async fn optimize_component(
        &self,
        history: &[TaskHistoryRecord],
        component: ComponentKind,
        task: &str,
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<OptimizationReport, PipelineError> {
        self.optimize(history, &[component], task, context, selection)
            .await
    }

    /// Analyze and suggest once, then describe changes for every component
    pub async fn optimize_all_components(
        &self,
        history: &[TaskHistoryRecord],
        task: &str,
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<OptimizationReport, PipelineError> {
        self.optimize(history, &ComponentKind::ALL, task, context, selection)
            .await
    }

    async fn optimize(
        &self,
        history: &[TaskHistoryRecord],
        components: &[ComponentKind],
        task: &str,
        context: &Context,
        selection: &BackendSelection,
    ) -> Result<OptimizationReport, PipelineError> {
        let analysis = self.analyze_performance(history, selection).await?;
        let suggestions = self
            .generate_optimization_suggestions(&analysis, task, selection)
            .await?;

        let mut report = OptimizationReport {
            analysis,
            components: Vec::with_capacity(components.len()),
        };
        for component in components {
            let selected = suggestions.for_component(*component);
            let changes = self
                .apply_optimizations(*component, selected, context, selection)
                .await?;
            report.components.push(ComponentOptimization {
                component: *component,
                suggestions: selected.to_vec(),
                changes,
            });
        }

        Ok(report)
    }
}
