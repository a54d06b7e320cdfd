//! Scene templates: declarative shot plans for common timelapse subjects.

/// Immutable descriptor of one shooting preset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneTemplate {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    /// Seconds between shots.
    pub interval_secs: u32,
    /// Total sequence duration in minutes.
    pub duration_mins: u32,
    /// Desired slider step per shot, in mm.
    pub step_mm_per_shot: f64,
    /// Motion axis; empty string means "use the configured default".
    pub axis: &'static str,
    /// Move before each capture (true) or after it (false).
    pub move_before_shot: bool,
    /// Post-move settle delay in ms, lets vibration die down.
    pub settle_ms: u64,
    /// Jog feed rate in mm/min.
    pub feed_mm_min: u32,
}

impl SceneTemplate {
    const fn preset(
        id: &'static str,
        title: &'static str,
        interval_secs: u32,
        duration_mins: u32,
        description: &'static str,
    ) -> Self {
        Self {
            id,
            title,
            description,
            interval_secs,
            duration_mins,
            step_mm_per_shot: 5.0,
            axis: "X",
            move_before_shot: true,
            settle_ms: 250,
            feed_mm_min: 800,
        }
    }

    /// Look a preset up by id.
    pub fn by_id(id: &str) -> Option<&'static SceneTemplate> {
        CATALOG.iter().find(|t| t.id == id)
    }
}

/// The fixed preset catalog.
pub const CATALOG: &[SceneTemplate] = &[
    SceneTemplate::preset("quick_test", "Quick test", 1, 1, "1 min test clip, 1 s/shot"),
    SceneTemplate::preset(
        "city_flow",
        "City flow",
        1,
        10,
        "Traffic and pedestrians, 10 min, 1 s/shot",
    ),
    SceneTemplate::preset(
        "clouds_fast",
        "Fast clouds",
        2,
        20,
        "Dynamic sky, 20 min, 2 s/shot",
    ),
    SceneTemplate::preset(
        "sunset",
        "Sunset",
        2,
        20,
        "Light transition, 20 min, 2 s/shot",
    ),
    SceneTemplate::preset(
        "clouds_slow",
        "Slow clouds",
        5,
        30,
        "Gentle evolution, 30 min, 5 s/shot",
    ),
    SceneTemplate::preset(
        "construction",
        "Construction site",
        10,
        60,
        "Work in progress, 60 min, 10 s/shot",
    ),
    SceneTemplate::preset(
        "plants",
        "Plant growth",
        15,
        120,
        "Visible change, 120 min, 15 s/shot",
    ),
    SceneTemplate::preset(
        "astro_basic",
        "Basic astro",
        15,
        60,
        "Early star trails, 60 min, 15 s/shot",
    ),
    SceneTemplate::preset(
        "print3d",
        "3D print",
        2,
        30,
        "Part taking shape, 30 min, 2 s/shot",
    ),
    SceneTemplate::preset(
        "people_flow",
        "People (indoor)",
        1,
        15,
        "Soft movement, 15 min, 1 s/shot",
    ),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_integrity() {
        assert_eq!(CATALOG.len(), 10);
        for template in CATALOG {
            assert!(!template.id.is_empty());
            assert!(template.interval_secs > 0);
            assert!(template.duration_mins > 0);
            assert!(template.step_mm_per_shot > 0.0);
        }
    }

    #[test]
    fn test_lookup_by_id() {
        let sunset = SceneTemplate::by_id("sunset");
        assert!(sunset.is_some());
        assert_eq!(sunset.map(|t| t.interval_secs), Some(2));
        assert!(SceneTemplate::by_id("nope").is_none());
    }
}
