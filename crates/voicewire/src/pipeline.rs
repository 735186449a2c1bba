//! Pipeline stages and the `run-pipeline` control message.
//!
//! A pipeline runs a contiguous sub-sequence of the fixed stage order
//! `wake < asr < intent < handle < tts`. The only legality rule lives here,
//! checked once at construction: the end stage may not come before the
//! start stage. Executing the stages belongs to the orchestration layer,
//! not this crate.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{EventError, PipelineError};
use crate::event::{Event, Eventable};

const RUN_PIPELINE_TYPE: &str = "run-pipeline";

/// One stage of a voice assistant pipeline, in processing order.
///
/// The derived `Ord` follows declaration order, which is the pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Wake word detection.
    Wake,
    /// Speech-to-text (automated speech recognition).
    Asr,
    /// Intent recognition.
    Intent,
    /// Intent handling.
    Handle,
    /// Text-to-speech.
    Tts,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wake => "wake",
            Self::Asr => "asr",
            Self::Intent => "intent",
            Self::Handle => "handle",
            Self::Tts => "tts",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "wake" => Some(Self::Wake),
            "asr" => Some(Self::Asr),
            "intent" => Some(Self::Intent),
            "handle" => Some(Self::Handle),
            "tts" => Some(Self::Tts),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request to run a pipeline from `start_stage` through `end_stage`.
///
/// Created once per pipeline invocation; the stage range is validated at
/// construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPipeline {
    start_stage: PipelineStage,
    end_stage: PipelineStage,

    /// Name of the wake word that triggered this pipeline.
    pub wake_word_name: Option<String>,

    /// Wake word names to listen for (when starting at the wake stage).
    pub wake_word_names: Option<Vec<String>>,

    /// Restart the pipeline automatically after it ends.
    pub restart_on_end: bool,

    /// Text to announce with text-to-speech (when starting at the TTS stage).
    pub announce_text: Option<String>,
}

impl RunPipeline {
    /// Validates that `end_stage` does not come before `start_stage`.
    pub fn new(start_stage: PipelineStage, end_stage: PipelineStage) -> Result<Self, PipelineError> {
        if end_stage < start_stage {
            return Err(PipelineError::InvalidStageOrder {
                start: start_stage,
                end: end_stage,
            });
        }
        Ok(Self {
            start_stage,
            end_stage,
            wake_word_name: None,
            wake_word_names: None,
            restart_on_end: false,
            announce_text: None,
        })
    }

    pub fn start_stage(&self) -> PipelineStage {
        self.start_stage
    }

    pub fn end_stage(&self) -> PipelineStage {
        self.end_stage
    }
}

impl Eventable for RunPipeline {
    fn is_type(event_type: &str) -> bool {
        event_type == RUN_PIPELINE_TYPE
    }

    fn to_event(&self) -> Event {
        let mut data = serde_json::Map::new();
        data.insert("start_stage".to_string(), json!(self.start_stage));
        data.insert("end_stage".to_string(), json!(self.end_stage));
        data.insert("restart_on_end".to_string(), json!(self.restart_on_end));
        if let Some(wake_word_name) = &self.wake_word_name {
            data.insert("wake_word_name".to_string(), json!(wake_word_name));
        }
        if let Some(wake_word_names) = &self.wake_word_names {
            if !wake_word_names.is_empty() {
                data.insert("wake_word_names".to_string(), json!(wake_word_names));
            }
        }
        if let Some(announce_text) = &self.announce_text {
            data.insert("announce_text".to_string(), json!(announce_text));
        }
        Event::new(RUN_PIPELINE_TYPE).with_data(data)
    }

    fn from_event(event: &Event) -> Result<Self, EventError> {
        if !Self::is_type(event.event_type()) {
            return Err(EventError::WrongType {
                expected: RUN_PIPELINE_TYPE.to_string(),
                actual: event.event_type().to_string(),
            });
        }

        let start_stage = parse_stage(event, "start_stage")?;
        let end_stage = parse_stage(event, "end_stage")?;
        let mut run = Self::new(start_stage, end_stage).map_err(|error| {
            EventError::InvalidField {
                event_type: RUN_PIPELINE_TYPE.to_string(),
                field: "end_stage".to_string(),
                reason: error.to_string(),
            }
        })?;

        run.wake_word_name = event
            .data_field("wake_word_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        run.wake_word_names = event.data_field("wake_word_names").and_then(|value| {
            value.as_array().map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
        });
        run.restart_on_end = event
            .data_field("restart_on_end")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        run.announce_text = event
            .data_field("announce_text")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(run)
    }
}

fn parse_stage(event: &Event, field: &str) -> Result<PipelineStage, EventError> {
    let name = event.require_str(field)?;
    PipelineStage::parse(name).ok_or_else(|| EventError::InvalidField {
        event_type: event.event_type().to_string(),
        field: field.to_string(),
        reason: format!("unknown pipeline stage {name:?}"),
    })
}
