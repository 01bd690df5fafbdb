/*!
Telemetry assembly: raw inference results plus the latest position become
the record served to the controller.
*/

use serde::{Deserialize, Serialize};
use shared::{Detection, FieldMapper, OffsetRecord, Position, ScreenDetection, TelemetryRecord};

/// One inference result, before field projection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(rename = "class")]
    pub class_id: i32,
    #[serde(rename = "prob")]
    pub probability: f32,
    /// Meters from the camera
    pub depth: f32,
    #[serde(rename = "screenLocation")]
    pub screen: ScreenDetection,
}

/// One line of bridge input: a detection batch or an offset command
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BridgeInput {
    Detections(Vec<RawDetection>),
    Command(OffsetCommand),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetCommand {
    SetGpsOffset(OffsetRecord),
    SetCameraOffset(OffsetRecord),
}

/// Build a fresh record from one cycle's detections
pub fn assemble_record(position: Position, detections: &[RawDetection], mapper: &FieldMapper) -> TelemetryRecord {
    let detections = detections
        .iter()
        .map(|raw| Detection {
            class_id: raw.class_id,
            probability: raw.probability,
            depth: raw.depth,
            screen: raw.screen,
            field: mapper.locate(&raw.screen, raw.depth, &position),
        })
        .collect();

    TelemetryRecord::new(position, detections)
}
