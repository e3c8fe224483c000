//! Constrained generative fallback (Tier 3).
//!
//! A small local model, constrained by a JSON schema, for phrasing the
//! first two tiers cannot handle. Always returns something: a model fault
//! or unusable output becomes UNKNOWN with zero confidence and the fault
//! recorded under `params.error`.
//!
//! Inference is serialized through a semaphore (one permit by default):
//! the local runtime is CPU-only and concurrent generations just queue
//! inside it anyway. No lock is held while waiting on the model; dropping
//! the `parse` future cancels the request and releases the permit.

use crate::config::LlmConfig;
use async_trait::async_trait;
use enms_shared::error::{VoiceError, VoiceResult};
use enms_shared::intent::{RawIntent, Tier, ALL_INTENT_KINDS, KNOWN_METRICS};
use enms_shared::whitelist::{MachineWhitelist, WhitelistHandle};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Machine names listed in the prompt; the rest only hurt a small model
const PROMPT_MACHINE_LIMIT: usize = 40;

/// Backend that turns a prompt into text
#[async_trait]
pub trait IntentModel: Send + Sync {
    /// Load the model into memory. May take a minute on a cold start.
    async fn load(&self) -> VoiceResult<()>;

    /// Generate a completion constrained to `schema`
    async fn generate(&self, prompt: &str, schema: &Value) -> VoiceResult<String>;

    fn name(&self) -> &str;
}

/// Local Ollama runtime, CPU only
pub struct OllamaIntentModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    keep_alive: String,
}

impl OllamaIntentModel {
    pub fn new(config: &LlmConfig) -> VoiceResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| VoiceError::Internal(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            keep_alive: config.keep_alive.clone(),
        })
    }

    async fn post_generate(&self, body: Value) -> VoiceResult<Value> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Inference(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VoiceError::Inference(format!(
                "runtime returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| VoiceError::Inference(format!("unreadable response: {}", e)))
    }
}

#[async_trait]
impl IntentModel for OllamaIntentModel {
    async fn load(&self) -> VoiceResult<()> {
        // A generate call without a prompt only loads the model
        let body = json!({
            "model": self.model,
            "keep_alive": self.keep_alive,
        });
        self.post_generate(body)
            .await
            .map_err(|e| VoiceError::ModelNotLoaded(format!("{}: {}", self.model, e)))?;
        Ok(())
    }

    async fn generate(&self, prompt: &str, schema: &Value) -> VoiceResult<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "format": schema,
            "stream": false,
            "keep_alive": self.keep_alive,
            "options": {
                "temperature": 0,
                "num_gpu": 0,
            },
        });
        let json = self.post_generate(body).await?;
        Ok(json
            .get("response")
            .and_then(|r| r.as_str())
            .unwrap_or("")
            .to_string())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Tier 3: shared model instance behind a load gate and an inference gate
pub struct GenerativeFallback {
    model: Arc<dyn IntentModel>,
    loaded: OnceCell<()>,
    permits: Semaphore,
    whitelist: WhitelistHandle,
    timeout: Duration,
    load_timeout: Duration,
}

impl GenerativeFallback {
    pub fn new(model: Arc<dyn IntentModel>, whitelist: MachineWhitelist, config: &LlmConfig) -> Self {
        Self {
            model,
            loaded: OnceCell::new(),
            permits: Semaphore::new(config.max_concurrent.max(1)),
            whitelist: WhitelistHandle::new(whitelist),
            timeout: Duration::from_secs(config.timeout_secs),
            load_timeout: Duration::from_secs(config.load_timeout_secs),
        }
    }

    pub fn update_whitelist(&self, whitelist: Arc<MachineWhitelist>) {
        self.whitelist.store(whitelist);
    }

    /// Health flag: the model finished loading at least once
    pub fn is_loaded(&self) -> bool {
        self.loaded.initialized()
    }

    /// Load once. A failed or cancelled load leaves the gate open for the
    /// next caller.
    pub async fn ensure_loaded(&self) -> VoiceResult<()> {
        self.loaded
            .get_or_try_init(|| async {
                info!("Loading intent model {}", self.model.name());
                tokio::time::timeout(self.load_timeout, self.model.load())
                    .await
                    .map_err(|_| VoiceError::InferenceTimeout(self.load_timeout.as_secs()))??;
                info!("Intent model {} loaded", self.model.name());
                Ok::<(), VoiceError>(())
            })
            .await
            .map(|_| ())
    }

    /// Load in the background so the first Tier 3 query does not pay for it
    pub fn prewarm(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.ensure_loaded().await {
                warn!("Intent model pre-warm failed: {}", e);
            }
        })
    }

    /// Parse one utterance. Never fails: faults come back as UNKNOWN.
    pub async fn parse(&self, utterance: &str) -> RawIntent {
        let raw = match self.try_parse(utterance).await {
            Ok(raw) => raw,
            Err(e) if e.is_inference_failure() => {
                warn!("Tier 3 failed for '{}': {}", utterance, e);
                RawIntent::unknown(utterance, Some(e.to_string()))
            }
            // Not the model's doing; still only this query is lost
            Err(e) => {
                error!("Tier 3 fault for '{}' [{}]: {}", utterance, e.code(), e);
                RawIntent::unknown(utterance, Some(e.to_string()))
            }
        };
        raw.with_tier(Tier::Llm)
    }

    async fn try_parse(&self, utterance: &str) -> VoiceResult<RawIntent> {
        let work = async {
            self.ensure_loaded().await?;
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| VoiceError::Internal("inference gate closed".to_string()))?;
            let prompt = build_prompt(utterance, &self.whitelist.snapshot());
            let text = self.model.generate(&prompt, &intent_schema()).await?;
            Ok::<String, VoiceError>(text)
        };
        let text = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| VoiceError::InferenceTimeout(self.timeout.as_secs()))??;
        debug!("Tier 3 raw output: {}", text);
        parse_model_output(&text, utterance)
    }
}

/// JSON schema the runtime constrains generation to
pub fn intent_schema() -> Value {
    let kinds: Vec<&str> = ALL_INTENT_KINDS.iter().map(|k| k.as_str()).collect();
    let nullable_string = json!({ "type": ["string", "null"] });
    json!({
        "type": "object",
        "properties": {
            "intent": { "type": "string", "enum": kinds },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "machine": nullable_string,
            "machines": { "type": ["array", "null"], "items": { "type": "string" } },
            "metric": nullable_string,
            "aggregation": nullable_string,
            "limit": { "type": ["integer", "null"] },
            "energy_source": nullable_string,
        },
        "required": ["intent", "confidence"],
    })
}

pub fn build_prompt(utterance: &str, whitelist: &MachineWhitelist) -> String {
    let kinds: Vec<&str> = ALL_INTENT_KINDS.iter().map(|k| k.as_str()).collect();
    let names = whitelist.names();
    let machines = if names.is_empty() {
        "(none known)".to_string()
    } else {
        names
            .iter()
            .take(PROMPT_MACHINE_LIMIT)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    format!(
        r#"You classify questions about factory energy data.
Reply with one JSON object and nothing else.

Intents: {kinds}
Metrics: {metrics}
Machines: {machines}

Rules:
- Use a machine name exactly as listed, or null when none is mentioned.
- "machines" is only for comparisons.
- Use "unknown" with confidence 0 if the question is not about the factory.

Example: "how much power is Boiler-1 drawing" -> {{"intent":"power_query","confidence":0.9,"machine":"Boiler-1","metric":"power"}}
Example: "what's the weather" -> {{"intent":"unknown","confidence":0.0}}

Question: "{utterance}"
"#,
        kinds = kinds.join(", "),
        metrics = KNOWN_METRICS.join(", "),
        machines = machines,
        utterance = utterance.replace('"', "'"),
    )
}

/// Turn raw model text into a [`RawIntent`], tolerating commentary and
/// markdown around the JSON object.
pub fn parse_model_output(text: &str, utterance: &str) -> VoiceResult<RawIntent> {
    let json = extract_first_json_object(text)
        .ok_or_else(|| VoiceError::MalformedOutput("no JSON object in model output".to_string()))?;
    let mut raw: RawIntent = serde_json::from_str(json)
        .map_err(|e| VoiceError::MalformedOutput(format!("invalid intent JSON: {}", e)))?;
    raw.utterance = utterance.to_string();
    Ok(raw)
}

/// First brace-balanced `{...}` in `text`. Braces inside JSON strings do
/// not count.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use enms_shared::intent::IntentKind;

    #[test]
    fn test_extract_direct() {
        assert_eq!(extract_first_json_object(r#"{"a":1}"#), Some(r#"{"a":1}"#));
    }

    #[test]
    fn test_extract_with_commentary_and_markdown() {
        let text = "Sure! Here you go:\n```json\n{\"intent\":\"kpi\",\"x\":{\"y\":2}}\n```\nHope that helps {";
        assert_eq!(
            extract_first_json_object(text),
            Some("{\"intent\":\"kpi\",\"x\":{\"y\":2}}")
        );
    }

    #[test]
    fn test_extract_ignores_braces_in_strings() {
        let text = r#"{"machine":"odd}name","n":"a\"}"} trailing"#;
        assert_eq!(
            extract_first_json_object(text),
            Some(r#"{"machine":"odd}name","n":"a\"}"}"#)
        );
    }

    #[test]
    fn test_extract_unbalanced_is_none() {
        assert_eq!(extract_first_json_object("{\"intent\": \"kpi\""), None);
        assert_eq!(extract_first_json_object("no json here"), None);
    }

    #[test]
    fn test_parse_model_output_sets_utterance() {
        let raw = parse_model_output(
            "{\"intent\":\"power_query\",\"confidence\":0.9,\"machine\":\"Boiler-1\"}",
            "boiler power",
        )
        .unwrap();
        assert_eq!(raw.kind(), IntentKind::PowerQuery);
        assert_eq!(raw.utterance, "boiler power");
    }

    #[test]
    fn test_parse_model_output_malformed() {
        let err = parse_model_output("I think it's power", "x").unwrap_err();
        assert!(matches!(err, VoiceError::MalformedOutput(_)));
    }

    #[test]
    fn test_prompt_lists_machines() {
        let wl = MachineWhitelist::new(["Boiler-1", "HVAC-Main"]);
        let prompt = build_prompt("say \"hi\"", &wl);
        assert!(prompt.contains("Boiler-1, HVAC-Main"));
        assert!(prompt.contains("power_query"));
        assert!(prompt.contains("say 'hi'"));
    }

    #[test]
    fn test_schema_enumerates_every_kind() {
        let schema = intent_schema();
        let kinds = schema["properties"]["intent"]["enum"].as_array().unwrap();
        assert_eq!(kinds.len(), ALL_INTENT_KINDS.len());
    }
}
