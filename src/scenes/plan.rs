//! Step-plan computation.
//!
//! Turns a [`SceneTemplate`] plus the live motion limits into a concrete,
//! bounded plan. The key rule: when the desired total travel exceeds the
//! configured ceiling, the per-step distance shrinks proportionally so the
//! whole sequence still fits, instead of the run being rejected or truncated.

use crate::scenes::template::SceneTemplate;
use crate::settings::SettingsStore;
use std::time::Duration;

/// Smallest step the firmware will act on.
pub const MIN_STEP_MM: f64 = 0.001;

/// Live motion ceiling, read fresh from settings before each run.
#[derive(Clone, Copy, Debug)]
pub struct MotionLimits {
    pub max_travel_mm: f64,
    pub max_feed: u32,
    pub default_axis: char,
}

impl MotionLimits {
    pub fn from_settings(settings: &SettingsStore) -> Self {
        Self {
            max_travel_mm: settings.max_travel_mm(),
            max_feed: settings.max_feed(),
            default_axis: settings.axis_default(),
        }
    }
}

/// Uppercased first letter of a template's axis field, or the configured
/// default when the field is blank.
pub(crate) fn resolve_axis(template_axis: &str, default: char) -> char {
    template_axis
        .trim()
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or(default)
}

/// Concrete bounded plan for one sequencer run.
#[derive(Clone, Copy, Debug)]
pub struct ScenePlan {
    pub axis: char,
    pub shots: u32,
    /// Redistributed per-step distance in mm (0 for a single-shot run).
    pub step_mm: f64,
    /// Feed rate clamped into [1, max_feed].
    pub feed: u32,
    pub settle: Duration,
    pub interval: Duration,
}

impl ScenePlan {
    pub fn compute(template: &SceneTemplate, limits: &MotionLimits) -> Self {
        let axis = resolve_axis(template.axis, limits.default_axis);

        let interval_secs = template.interval_secs.max(1);
        let shots = (template.duration_mins * 60 / interval_secs).max(1);

        let desired_step = template.step_mm_per_shot.max(MIN_STEP_MM);
        let desired_travel = desired_step * f64::from(shots.saturating_sub(1));
        let capped_travel = desired_travel.min(limits.max_travel_mm);
        let step_mm = if shots > 1 {
            capped_travel / f64::from(shots - 1)
        } else {
            0.0
        };

        Self {
            axis,
            shots,
            step_mm,
            feed: template.feed_mm_min.clamp(1, limits.max_feed.max(1)),
            settle: Duration::from_millis(template.settle_ms),
            interval: Duration::from_secs(u64::from(interval_secs)),
        }
    }

    /// Total travel the plan will request.
    pub fn total_travel_mm(&self) -> f64 {
        self.step_mm * f64::from(self.shots.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(interval_secs: u32, duration_mins: u32, step: f64, feed: u32) -> SceneTemplate {
        SceneTemplate {
            id: "test",
            title: "Test",
            description: "",
            interval_secs,
            duration_mins,
            step_mm_per_shot: step,
            axis: "X",
            move_before_shot: true,
            settle_ms: 250,
            feed_mm_min: feed,
        }
    }

    fn limits(max_travel_mm: f64, max_feed: u32) -> MotionLimits {
        MotionLimits {
            max_travel_mm,
            max_feed,
            default_axis: 'X',
        }
    }

    #[test]
    fn test_travel_capped_and_step_redistributed() {
        // 10 min at 2 s/shot = 300 shots; 5 mm/shot wants 1495 mm but the
        // slider only has 400 mm.
        let plan = ScenePlan::compute(&template(2, 10, 5.0, 800), &limits(400.0, 1500));
        assert_eq!(plan.shots, 300);
        assert!((plan.total_travel_mm() - 400.0).abs() < 1e-9);
        assert!((plan.step_mm - 400.0 / 299.0).abs() < 1e-9);
        assert_eq!(plan.feed, 800);
    }

    #[test]
    fn test_tight_travel_limit() {
        let plan = ScenePlan::compute(&template(2, 10, 5.0, 800), &limits(50.0, 1500));
        assert_eq!(plan.shots, 300);
        assert!((plan.step_mm - 50.0 / 299.0).abs() < 1e-9);
        assert!(plan.total_travel_mm() <= 50.0 + 1e-9);
    }

    #[test]
    fn test_travel_within_limit_untouched() {
        let plan = ScenePlan::compute(&template(10, 5, 1.0, 300), &limits(400.0, 1500));
        assert_eq!(plan.shots, 30);
        assert!((plan.step_mm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_shot_has_no_motion() {
        let plan = ScenePlan::compute(&template(120, 1, 5.0, 800), &limits(400.0, 1500));
        assert_eq!(plan.shots, 1);
        assert_eq!(plan.step_mm, 0.0);
        assert_eq!(plan.total_travel_mm(), 0.0);
    }

    #[test]
    fn test_feed_clamped() {
        let plan = ScenePlan::compute(&template(2, 10, 5.0, 9000), &limits(400.0, 1500));
        assert_eq!(plan.feed, 1500);
        let plan = ScenePlan::compute(&template(2, 10, 5.0, 0), &limits(400.0, 1500));
        assert_eq!(plan.feed, 1);
    }

    #[test]
    fn test_axis_falls_back_to_default() {
        let mut t = template(2, 10, 5.0, 800);
        t.axis = "";
        let plan = ScenePlan::compute(&t, &limits(400.0, 1500));
        assert_eq!(plan.axis, 'X');

        t.axis = "y";
        let plan = ScenePlan::compute(&t, &limits(400.0, 1500));
        assert_eq!(plan.axis, 'Y');
    }
}
