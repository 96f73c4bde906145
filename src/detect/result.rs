use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;
use crate::geometry::BBox;

/// Road infrastructure element classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    SignBoard,
    LaneMarking,
    Guardrail,
    Divider,
    PavementDefect,
    RoadStud,
    RoadsideHazard,
}

impl ElementType {
    pub const ALL: [ElementType; 7] = [
        ElementType::SignBoard,
        ElementType::LaneMarking,
        ElementType::Guardrail,
        ElementType::Divider,
        ElementType::PavementDefect,
        ElementType::RoadStud,
        ElementType::RoadsideHazard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignBoard => "sign_board",
            Self::LaneMarking => "lane_marking",
            Self::Guardrail => "guardrail",
            Self::Divider => "divider",
            Self::PavementDefect => "pavement_defect",
            Self::RoadStud => "road_stud",
            Self::RoadsideHazard => "roadside_hazard",
        }
    }

    /// Human-readable name for reason strings.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SignBoard => "Sign board",
            Self::LaneMarking => "Lane marking",
            Self::Guardrail => "Guardrail",
            Self::Divider => "Divider",
            Self::PavementDefect => "Pavement defect",
            Self::RoadStud => "Road stud",
            Self::RoadsideHazard => "Roadside hazard",
        }
    }

    /// Elements whose loss or displacement directly affects road safety.
    pub fn is_safety_critical(&self) -> bool {
        matches!(
            self,
            Self::SignBoard | Self::LaneMarking | Self::Guardrail | Self::Divider | Self::RoadStud
        )
    }

    /// Painted or surface elements that degrade in place, checked for fading.
    pub fn is_surface_element(&self) -> bool {
        matches!(self, Self::LaneMarking | Self::PavementDefect)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        // Aliases used by common road-damage model exports.
        let element = match normalised.as_str() {
            "sign" | "traffic_sign" => Some(Self::SignBoard),
            "lane" | "faded_marking" | "road_marking" => Some(Self::LaneMarking),
            "damaged_guardrail" | "barrier" => Some(Self::Guardrail),
            "median" => Some(Self::Divider),
            "pothole" | "crack" => Some(Self::PavementDefect),
            "cat_eye" | "reflector" => Some(Self::RoadStud),
            "debris" | "cone" => Some(Self::RoadsideHazard),
            other => Self::ALL.iter().copied().find(|e| e.as_str() == other),
        };
        element.ok_or_else(|| PipelineError::InvalidConfig(format!("unknown element type '{s}'")))
    }
}

/// One typed, scored box in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub element_type: ElementType,
    pub bbox: BBox,
    pub confidence: f32,
    pub frame_index: u32,
}

impl Detection {
    pub fn new(element_type: ElementType, bbox: BBox, confidence: f32, frame_index: u32) -> Self {
        Self {
            element_type,
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            frame_index,
        }
    }
}
