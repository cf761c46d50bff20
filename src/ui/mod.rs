pub mod icons;
pub mod story_progress;

pub use story_progress::{EngineUI, UiMode, format_duration};
