use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
        CreateChatCompletionRequest, Role,
    },
    Client,
};
use async_trait::async_trait;
use moka::sync::Cache;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::{AnalysisSnapshot, ColumnMap, ColumnStatistics, RowRecord};
use crate::services::analysis::charts::ChartSpec;

const SAMPLE_ROWS: usize = 5;
const FALLBACK_FOCUS_COLUMNS: usize = 3;
const CACHE_CAPACITY: u64 = 128;

/// A hosted text model. Takes a prompt, returns the raw completion.
#[async_trait]
pub trait InsightModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, AppError>;
}

pub struct OpenAiInsightModel {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiInsightModel {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }
}

#[async_trait]
impl InsightModel for OpenAiInsightModel {
    async fn complete(&self, prompt: &str) -> Result<String, AppError> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: SYSTEM_PROMPT.to_string(),
                name: None,
                role: Role::System,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                name: None,
                role: Role::User,
            }),
        ];

        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: Some(0.1),
            ..Default::default()
        };

        let start = std::time::Instant::now();
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::LlmError(e.to_string()))?;
        tracing::info!("Completion from {} received in {:?}", self.model, start.elapsed());

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::LlmError("Model returned no content".to_string()))
    }
}

const SYSTEM_PROMPT: &str = "You are a business data analyst. Be concise, specific and ground every statement in the data you are given.";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendedColumn {
    pub name: String,
    pub reason: String,
    pub priority: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalStatistic {
    pub column: String,
    pub metric: String,
    /// Number or text, whatever the model sent.
    pub value: Value,
    pub significance: String,
}

/// Structured recommendations. Every field tolerates being absent or
/// malformed in the model output and falls back to empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    pub key_insights: String,
    pub recommended_columns: Vec<RecommendedColumn>,
    pub visualizations: Vec<ChartSpec>,
    pub critical_statistics: Vec<CriticalStatistic>,
    pub data_quality_issues: Vec<String>,
    pub actionable_recommendations: Vec<String>,
}

impl Recommendations {
    pub fn from_value(value: &Value) -> Self {
        Self {
            key_insights: text_field(value, "keyInsights"),
            recommended_columns: list_field(value, "recommendedColumns"),
            visualizations: list_field(value, "visualizations"),
            critical_statistics: list_field(value, "criticalStatistics"),
            data_quality_issues: list_field(value, "dataQualityIssues"),
            actionable_recommendations: list_field(value, "actionableRecommendations"),
        }
    }

    /// Columns named by the critical statistics that exist in the data, or
    /// the first few numeric columns when none match.
    pub fn focus_columns(&self, statistics: &ColumnMap<ColumnStatistics>) -> Vec<String> {
        let mut named: Vec<String> = Vec::new();
        for stat in &self.critical_statistics {
            if statistics.get(&stat.column).is_some() && !named.contains(&stat.column) {
                named.push(stat.column.clone());
            }
        }
        if !named.is_empty() {
            return named;
        }

        statistics
            .iter()
            .filter(|(_, stats)| stats.is_numeric())
            .take(FALLBACK_FOCUS_COLUMNS)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

fn text_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

/// Elements of an array field that deserialize; anything else is skipped.
fn list_field<T: DeserializeOwned>(value: &Value, key: &str) -> Vec<T> {
    let Some(Value::Array(items)) = value.get(key) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Parses a completion as JSON, falling back to the outermost `{...}` span.
pub fn extract_json(response: &str) -> Result<Value, AppError> {
    if let Ok(value) = serde_json::from_str::<Value>(response.trim()) {
        if value.is_object() {
            return Ok(value);
        }
    }

    let re = Regex::new(r"\{[\s\S]*\}")
        .map_err(|e| AppError::ParseError(format!("Failed to create regex: {}", e)))?;
    let json_str = re
        .find(response)
        .ok_or_else(|| AppError::LlmError("No JSON object found in model response".to_string()))?
        .as_str();

    serde_json::from_str(json_str)
        .map_err(|e| AppError::LlmError(format!("Failed to parse model JSON: {}", e)))
}

/// What the model gets to see of a snapshot.
#[derive(Serialize)]
struct PromptContext<'a> {
    row_count: usize,
    headers: &'a [String],
    sample: Vec<RowRecord<'a>>,
    statistics: &'a ColumnMap<ColumnStatistics>,
}

fn column_summary(snapshot: &AnalysisSnapshot) -> String {
    snapshot
        .profile
        .iter()
        .map(|(name, profile)| {
            format!(
                "- {}: {:?} ({}/{} values, {:.2}% complete)",
                name,
                profile.kind,
                profile.non_null,
                snapshot.table.len(),
                profile.completeness
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn context_json(snapshot: &AnalysisSnapshot) -> Result<String, AppError> {
    let context = PromptContext {
        row_count: snapshot.table.len(),
        headers: &snapshot.headers,
        sample: snapshot.table.head(SAMPLE_ROWS),
        statistics: &snapshot.statistics,
    };
    Ok(serde_json::to_string_pretty(&context)?)
}

pub fn recommendations_prompt(snapshot: &AnalysisSnapshot) -> Result<String, AppError> {
    Ok(format!(
        r#"Analyze this dataset and propose visualizations that support specific business decisions.

Columns and types:
{}

Dataset:
{}

Compare performance across categories, show trends that separate top performers from underperformers and highlight the metrics that drive revenue, profit or growth.

Return ONLY valid JSON (no markdown):
{{
  "keyInsights": "2-3 sentences on the main opportunity or problem",
  "recommendedColumns": [{{"name": "column", "reason": "why it matters", "priority": "high|medium|low"}}],
  "visualizations": [{{"columns": ["col1", "col2"], "type": "scatter|line|histogram|bar|box", "title": "question answered", "insight": "decision supported"}}],
  "criticalStatistics": [{{"column": "column", "metric": "mean|median|min|max|range", "value": "the value", "significance": "why it matters"}}],
  "dataQualityIssues": [],
  "actionableRecommendations": ["specific action"]
}}"#,
        column_summary(snapshot),
        context_json(snapshot)?
    ))
}

pub fn narrative_prompt(snapshot: &AnalysisSnapshot) -> Result<String, AppError> {
    Ok(format!(
        r#"Analyze this dataset and provide insights.

Columns:
{}

Dataset:
{}

Cover key patterns and trends, notable statistics or anomalies, data quality observations and potential next steps. Be concise but thorough."#,
        column_summary(snapshot),
        context_json(snapshot)?
    ))
}

pub fn scenario_prompt(snapshot: &AnalysisSnapshot, question: &str) -> String {
    let stats = snapshot
        .statistics
        .iter()
        .map(|(name, stats)| match stats {
            ColumnStatistics::Numeric(s) => format!(
                "{}: Mean={:.2}, Min={}, Max={}, Sum={:.2}",
                name, s.mean, s.min, s.max, s.sum
            ),
            ColumnStatistics::Categorical(s) => {
                format!("{}: Unique Values={}, Count={}", name, s.unique, s.count)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Based on this dataset, answer the following business question.

Total records: {}
Columns: {}

Column statistics:
{}

User question: {}

Provide data-backed insights, recommended actions, potential risks and the quantified impact where possible. Keep it focused on decision-making."#,
        snapshot.table.len(),
        snapshot.headers.join(", "),
        stats,
        question
    )
}

/// Prompts the model about the current snapshot and caches answers per
/// snapshot version.
pub struct InsightService {
    model: Option<Arc<dyn InsightModel>>,
    recommendations: Cache<u64, Arc<Recommendations>>,
    texts: Cache<(u64, String), Arc<String>>,
}

impl InsightService {
    pub fn new(model: Option<Arc<dyn InsightModel>>) -> Self {
        Self {
            model,
            recommendations: Cache::new(CACHE_CAPACITY),
            texts: Cache::new(CACHE_CAPACITY),
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        let model = config.openai_key.as_deref().map(|key| {
            Arc::new(OpenAiInsightModel::new(key, config.insight_model.clone())) as Arc<dyn InsightModel>
        });
        Self::new(model)
    }

    fn model(&self) -> Result<&Arc<dyn InsightModel>, AppError> {
        self.model
            .as_ref()
            .ok_or_else(|| AppError::LlmError("Insight model is not configured".to_string()))
    }

    pub async fn recommendations(&self, snapshot: &AnalysisSnapshot) -> Result<Arc<Recommendations>, AppError> {
        if let Some(cached) = self.recommendations.get(&snapshot.version) {
            return Ok(cached);
        }

        let model = self.model()?;
        let response = model.complete(&recommendations_prompt(snapshot)?).await?;
        let value = extract_json(&response)?;
        let recommendations = Arc::new(Recommendations::from_value(&value));
        tracing::info!(
            "Received {} visualization and {} column recommendation(s)",
            recommendations.visualizations.len(),
            recommendations.recommended_columns.len()
        );

        self.recommendations.insert(snapshot.version, recommendations.clone());
        Ok(recommendations)
    }

    pub async fn narrative(&self, snapshot: &AnalysisSnapshot) -> Result<Arc<String>, AppError> {
        let prompt = narrative_prompt(snapshot)?;
        self.cached_text(snapshot.version, "narrative".to_string(), &prompt).await
    }

    pub async fn scenario(&self, snapshot: &AnalysisSnapshot, question: &str) -> Result<Arc<String>, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidInput("Question must not be empty".to_string()));
        }
        let prompt = scenario_prompt(snapshot, question);
        self.cached_text(snapshot.version, format!("scenario:{}", question), &prompt)
            .await
    }

    async fn cached_text(&self, version: u64, kind: String, prompt: &str) -> Result<Arc<String>, AppError> {
        let key = (version, kind);
        if let Some(cached) = self.texts.get(&key) {
            return Ok(cached);
        }

        let text = Arc::new(self.model()?.complete(prompt).await?);
        self.texts.insert(key, text.clone());
        Ok(text)
    }

    pub fn invalidate(&self) {
        self.recommendations.invalidate_all();
        self.texts.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cell, Row, Table};
    use crate::services::analysis::profiler::build_snapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedModel {
        response: String,
        calls: AtomicUsize,
    }

    impl CannedModel {
        fn new(response: &str) -> Arc<Self> {
            Arc::new(Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InsightModel for CannedModel {
        async fn complete(&self, _prompt: &str) -> Result<String, AppError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn snapshot() -> AnalysisSnapshot {
        let rows = (0..8)
            .map(|i| {
                Row::new(vec![
                    Cell::Text(if i % 2 == 0 { "east" } else { "west" }.to_string()),
                    Cell::Number(i as f64 * 10.0),
                    Cell::Number(i as f64),
                ])
            })
            .collect();
        let mut snapshot = build_snapshot(Table::new(
            vec!["region".to_string(), "sales".to_string(), "units".to_string()],
            rows,
        ));
        snapshot.version = 1;
        snapshot
    }

    #[test]
    fn test_extract_json_from_prose() {
        let value = extract_json("Sure! Here you go:\n```json\n{\"keyInsights\": \"x\"}\n```").unwrap();
        assert_eq!(value["keyInsights"], "x");
        assert!(matches!(extract_json("no braces here"), Err(AppError::LlmError(_))));
        assert!(matches!(extract_json("{broken"), Err(AppError::LlmError(_))));
    }

    #[test]
    fn test_malformed_fields_default_to_empty() {
        let value: Value = serde_json::json!({
            "keyInsights": 42,
            "recommendedColumns": "sales",
            "visualizations": [
                {"columns": ["region", "sales"], "type": "bar", "title": "Sales by region"},
                {"columns": "oops"},
                7
            ],
            "criticalStatistics": [{"column": "sales", "metric": "mean", "value": 35}],
            "actionableRecommendations": ["Expand east", 3]
        });
        let parsed = Recommendations::from_value(&value);
        assert_eq!(parsed.key_insights, "");
        assert!(parsed.recommended_columns.is_empty());
        assert_eq!(parsed.visualizations.len(), 1);
        assert_eq!(parsed.visualizations[0].chart_type, "bar");
        assert_eq!(parsed.critical_statistics[0].value, serde_json::json!(35));
        assert_eq!(parsed.critical_statistics[0].significance, "");
        assert!(parsed.data_quality_issues.is_empty());
        assert_eq!(parsed.actionable_recommendations, vec!["Expand east"]);
    }

    #[test]
    fn test_focus_columns() {
        let snapshot = snapshot();
        let mut recs = Recommendations::default();
        assert_eq!(recs.focus_columns(&snapshot.statistics), vec!["sales", "units"]);

        recs.critical_statistics = vec![
            CriticalStatistic { column: "units".to_string(), ..Default::default() },
            CriticalStatistic { column: "ghost".to_string(), ..Default::default() },
            CriticalStatistic { column: "units".to_string(), ..Default::default() },
        ];
        assert_eq!(recs.focus_columns(&snapshot.statistics), vec!["units"]);
    }

    #[test]
    fn test_prompts_carry_the_data() {
        let snapshot = snapshot();
        let prompt = recommendations_prompt(&snapshot).unwrap();
        assert!(prompt.contains("\"keyInsights\""));
        assert!(prompt.contains("\"row_count\": 8"));
        assert!(prompt.contains("- sales: Numeric (8/8 values, 100.00% complete)"));

        let scenario = scenario_prompt(&snapshot, "What if sales drop?");
        assert!(scenario.contains("User question: What if sales drop?"));
        assert!(scenario.contains("region: Unique Values=2, Count=8"));
        assert!(scenario.contains("sales: Mean=35.00"));
    }

    #[tokio::test]
    async fn test_recommendations_are_cached_per_version() {
        let model = CannedModel::new(
            r#"Here: {"keyInsights": "East leads", "visualizations": [{"columns": ["region", "sales"], "type": "bar"}]}"#,
        );
        let service = InsightService::new(Some(model.clone()));
        let mut snapshot = snapshot();

        let first = service.recommendations(&snapshot).await.unwrap();
        let second = service.recommendations(&snapshot).await.unwrap();
        assert_eq!(first.key_insights, "East leads");
        assert_eq!(first, second);
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);

        snapshot.version = 2;
        service.recommendations(&snapshot).await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_text_insights() {
        let model = CannedModel::new("Sales grow steadily.");
        let service = InsightService::new(Some(model.clone()));
        let snapshot = snapshot();

        assert_eq!(*service.narrative(&snapshot).await.unwrap(), "Sales grow steadily.");
        service.scenario(&snapshot, "What if?").await.unwrap();
        service.scenario(&snapshot, " What if? ").await.unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);

        assert!(matches!(
            service.scenario(&snapshot, "   ").await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_recommendations_fail_softly() {
        let service = InsightService::new(Some(CannedModel::new("I cannot help with that.")));
        let result = service.recommendations(&snapshot()).await;
        assert!(matches!(result, Err(AppError::LlmError(_))));
    }

    #[test]
    fn test_missing_model() {
        let service = InsightService::new(None);
        let result = tokio_test::block_on(service.narrative(&snapshot()));
        assert!(matches!(result, Err(AppError::LlmError(_))));
    }
}
