//! JSON messages exchanged with the phase-segmentation service.
//!
//! Every message is a JSON object with a `type` field naming the message kind.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use stride_body::{Frame, Landmark, Phase, PhaseTransition};

/// Messages sent to the service.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    StartTest {
        patient_id: String,
        user_id: String,
    },
    FrameData(FrameData),
    StopTest,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameData {
    /// Seconds.
    pub timestamp: f64,
    pub landmarks: Vec<[f32; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub world_landmarks: Option<Vec<[f32; 3]>>,
}

fn positions(landmarks: &[Landmark]) -> Vec<[f32; 3]> {
    landmarks.iter().map(Landmark::position).collect()
}

impl FrameData {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            timestamp: frame.time,
            landmarks: positions(&frame.landmarks),
            world_landmarks: frame.world_landmarks.as_deref().map(positions),
        }
    }
}

impl Outbound {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::StartTest { .. } => "start_test",
            Outbound::FrameData(_) => "frame_data",
            Outbound::StopTest => "stop_test",
            Outbound::Ping => "ping",
        }
    }
}

/// Messages received from the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    TestStarted,
    PhaseUpdate(PhaseUpdate),
    PhaseTransition(PhaseTransitionUpdate),
    TestCompleted(TestResult),
    Pong,
    /// The service rejected a request or failed.
    Error {
        #[serde(default)]
        message: String,
    },
    /// Any message type this client does not know about.
    #[serde(other)]
    Unknown,
}

impl Inbound {
    /// Parses an inbound message. Malformed messages are logged and dropped.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(msg) => Some(msg),
            Err(e) => {
                log::debug!("dropping malformed message ({e}): {text}");
                None
            }
        }
    }
}

/// Incremental phase state. Absent fields leave the local state unchanged.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PhaseUpdate {
    #[serde(default, deserialize_with = "lenient_phase")]
    pub current_phase: Option<Phase>,
    pub phase_label: Option<String>,
    pub elapsed_time: Option<f64>,
    pub leg_angle: Option<f64>,
    pub hip_height: Option<f64>,
}

/// Authoritative phase transition list, plus the fields of a [`PhaseUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PhaseTransitionUpdate {
    #[serde(default, deserialize_with = "lenient_phase")]
    pub current_phase: Option<Phase>,
    pub phase_label: Option<String>,
    pub elapsed_time: Option<f64>,
    pub transitions: Option<Vec<PhaseTransition>>,
}

/// Terminal result of a test run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub total_time_seconds: f64,
    #[serde(default)]
    pub walk_speed_mps: Option<f64>,
    #[serde(default)]
    pub assessment: Option<String>,
    /// Any further fields the service reports.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Phase names this client does not know (or `null`) are treated as absent.
fn lenient_phase<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Phase>, D::Error> {
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|name| {
        let phase = Phase::ALL.into_iter().find(|p| p.as_str() == name);
        if phase.is_none() {
            log::debug!("ignoring unknown phase '{name}'");
        }
        phase
    }))
}
