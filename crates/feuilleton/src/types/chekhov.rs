//! Chekhov's guns: narrative promises that must eventually be resolved.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GunType {
    #[default]
    Object,
    Skill,
    Threat,
    Promise,
    Foreshadowing,
    Question,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChekhovGun {
    pub element: String,
    #[serde(default)]
    pub element_type: GunType,
    #[serde(default)]
    pub expectation: String,
    pub introduced_chapter: u32,
    /// 1–10; 7+ unresolved guns raise alerts after 15 chapters.
    #[serde(default)]
    pub urgency: u8,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default)]
    pub resolved_chapter: Option<u32>,
    #[serde(default)]
    pub hints_dropped: Vec<String>,
}

impl ChekhovGun {
    /// Age in chapters at `current_chapter`.
    #[must_use]
    pub fn age(&self, current_chapter: u32) -> u32 {
        current_chapter.saturating_sub(self.introduced_chapter)
    }

    /// Stale guns are unresolved, urgent (≥ 7) and older than 15 chapters.
    #[must_use]
    pub fn is_stale(&self, current_chapter: u32) -> bool {
        !self.resolved && self.urgency >= 7 && self.age(current_chapter) >= 15
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_needs_age_and_urgency() {
        let gun = ChekhovGun {
            element: "le revolver du grenier".to_string(),
            introduced_chapter: 2,
            urgency: 8,
            ..Default::default()
        };
        assert!(!gun.is_stale(10));
        assert!(gun.is_stale(17));

        let calm = ChekhovGun {
            urgency: 4,
            introduced_chapter: 2,
            ..Default::default()
        };
        assert!(!calm.is_stale(40));
    }
}
