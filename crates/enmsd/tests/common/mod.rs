//! Shared fixtures for enmsd integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use enms_shared::error::{VoiceError, VoiceResult};
use enmsd::config::Config;
use enmsd::generative::IntentModel;
use enmsd::Pipeline;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const UNKNOWN_REPLY: &str = r#"{"intent":"unknown","confidence":0.0}"#;

pub fn plant_machines() -> Vec<String> {
    [
        "Compressor-1",
        "Compressor-EU-1",
        "Boiler-1",
        "HVAC-Main",
        "HVAC-EU-North",
        "Injection-Molding-1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Thursday 2024-03-14 12:00 UTC
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 14, 12, 0, 0).unwrap()
}

/// Fake model: answers from a queue, then with UNKNOWN
pub struct ScriptedModel {
    replies: Mutex<VecDeque<VoiceResult<String>>>,
    delay: Option<Duration>,
    pub generate_calls: AtomicUsize,
    pub load_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            delay: None,
            generate_calls: AtomicUsize::new(0),
            load_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn reply(self, text: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(self, error: VoiceError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentModel for ScriptedModel {
    async fn load(&self) -> VoiceResult<()> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn generate(&self, _prompt: &str, _schema: &Value) -> VoiceResult<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().unwrap().pop_front();

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| Ok(UNKNOWN_REPLY.to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.roster.seed_machines = plant_machines();
    config.llm.prewarm = false;
    config.llm.timeout_secs = 5;
    config
}

pub fn pipeline(model: ScriptedModel) -> (Pipeline, Arc<ScriptedModel>) {
    let model = Arc::new(model);
    let pipeline = Pipeline::new(&test_config(), model.clone()).unwrap();
    (pipeline, model)
}
