//! Logical Features
//!
//! The capabilities callers ask for, independent of the provider serving them.

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A logical capability bound to one or more provider+model pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Whole-script structure and plot analysis
    ScriptAnalysis,
    /// Character extraction from script text
    CharacterExtraction,
    /// Scene extraction from script text
    SceneExtraction,
    /// Shot list / storyboard breakdown
    ShotBreakdown,
    /// Prompt writing for image generation
    ImagePrompt,
    /// Prompt writing for video generation
    VideoPrompt,
    /// Prompt calibration pipelines
    PromptCalibration,
    /// Image generation
    ImageGeneration,
    /// Video generation
    VideoGeneration,
    /// Free-form assistant chat
    Chat,
}

impl Feature {
    pub const ALL: [Feature; 10] = [
        Feature::ScriptAnalysis,
        Feature::CharacterExtraction,
        Feature::SceneExtraction,
        Feature::ShotBreakdown,
        Feature::ImagePrompt,
        Feature::VideoPrompt,
        Feature::PromptCalibration,
        Feature::ImageGeneration,
        Feature::VideoGeneration,
        Feature::Chat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::ScriptAnalysis => "script_analysis",
            Feature::CharacterExtraction => "character_extraction",
            Feature::SceneExtraction => "scene_extraction",
            Feature::ShotBreakdown => "shot_breakdown",
            Feature::ImagePrompt => "image_prompt",
            Feature::VideoPrompt => "video_prompt",
            Feature::PromptCalibration => "prompt_calibration",
            Feature::ImageGeneration => "image_generation",
            Feature::VideoGeneration => "video_generation",
            Feature::Chat => "chat",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == needle)
            .ok_or_else(|| DispatchError::Config(format!("Unknown feature '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip_names() {
        for feature in Feature::ALL {
            assert_eq!(feature.as_str().parse::<Feature>().unwrap(), feature);
        }
        assert_eq!(
            " Script_Analysis ".parse::<Feature>().unwrap(),
            Feature::ScriptAnalysis
        );
        assert!("screenplay".parse::<Feature>().is_err());
    }

    #[test]
    fn test_serde_name_matches_display() {
        let json = serde_json::to_string(&Feature::VideoGeneration).unwrap();
        assert_eq!(json, "\"video_generation\"");
    }
}
