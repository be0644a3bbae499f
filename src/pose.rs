//! Static catalog of target poses
//!
//! Each photo type maps to operator instructions and a framing archetype.
//! The catalog is compiled in and never mutated.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingArchetype {
    Frontal,
    ProfileLeft,
    ProfileRight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoseSpec {
    pub pose_id: &'static str,
    pub instruction_text: &'static str,
    pub tips: &'static [&'static str],
    pub framing: FramingArchetype,
}

static POSES: &[PoseSpec] = &[
    PoseSpec {
        pose_id: "frontal_rest",
        instruction_text: "Face the camera with a relaxed, neutral expression",
        tips: &["Keep eyes open and looking at the lens", "Pull hair away from the forehead"],
        framing: FramingArchetype::Frontal,
    },
    PoseSpec {
        pose_id: "glabellar",
        instruction_text: "Frown as hard as possible, drawing the brows together",
        tips: &["Hold the contraction for two seconds", "Keep the head level"],
        framing: FramingArchetype::Frontal,
    },
    PoseSpec {
        pose_id: "frontalis",
        instruction_text: "Raise the eyebrows as high as possible",
        tips: &["Look straight ahead", "Make sure the full forehead is visible"],
        framing: FramingArchetype::Frontal,
    },
    PoseSpec {
        pose_id: "smile",
        instruction_text: "Give a full smile showing the teeth",
        tips: &["Keep the chin parallel to the floor"],
        framing: FramingArchetype::Frontal,
    },
    PoseSpec {
        pose_id: "crows_feet_left",
        instruction_text: "Turn to show the left side and smile broadly",
        tips: &["Keep the outer eye corner inside the guide", "Avoid squinting into the light"],
        framing: FramingArchetype::ProfileLeft,
    },
    PoseSpec {
        pose_id: "crows_feet_right",
        instruction_text: "Turn to show the right side and smile broadly",
        tips: &["Keep the outer eye corner inside the guide", "Avoid squinting into the light"],
        framing: FramingArchetype::ProfileRight,
    },
    PoseSpec {
        pose_id: "profile_left",
        instruction_text: "Turn 90 degrees to show the left profile",
        tips: &["Align the nose tip with the guide line", "Keep the shoulders relaxed"],
        framing: FramingArchetype::ProfileLeft,
    },
    PoseSpec {
        pose_id: "profile_right",
        instruction_text: "Turn 90 degrees to show the right profile",
        tips: &["Align the nose tip with the guide line", "Keep the shoulders relaxed"],
        framing: FramingArchetype::ProfileRight,
    },
];

pub fn all() -> &'static [PoseSpec] {
    POSES
}

pub fn find(pose_id: &str) -> Option<&'static PoseSpec> {
    POSES.iter().find(|pose| pose.pose_id == pose_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_known_pose() {
        let pose = find("glabellar").unwrap();
        assert_eq!(pose.framing, FramingArchetype::Frontal);
        assert!(!pose.tips.is_empty());
    }

    #[test]
    fn test_unknown_pose() {
        assert!(find("elbow").is_none());
    }

    #[test]
    fn test_pose_ids_unique() {
        let mut ids: Vec<_> = all().iter().map(|p| p.pose_id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn test_profiles_have_profile_framing() {
        assert_eq!(find("profile_left").unwrap().framing, FramingArchetype::ProfileLeft);
        assert_eq!(find("profile_right").unwrap().framing, FramingArchetype::ProfileRight);
    }
}
