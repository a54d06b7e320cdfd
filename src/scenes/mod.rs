//! Shooting templates and the motion sequencer.

pub mod plan;
pub mod runner;
pub mod template;

pub use plan::{MotionLimits, ScenePlan};
pub use runner::{ClientProvider, MoveError, Progress, SceneEvent, ScenesRunner};
pub use template::{SceneTemplate, CATALOG};
