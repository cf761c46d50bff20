//! Dependency resolution for stories.
//!
//! 1. **Builder** - validates ids and dependencies
//! 2. **Order** - produces the deterministic execution order and rejects cycles
//!
//! ```no_run
//! use storyforge::dag::resolve_order;
//! use storyforge::story::UserStory;
//!
//! # fn example() -> Result<(), storyforge::errors::EngineError> {
//! let stories = vec![
//!     UserStory::new("A", "Setup", vec![]),
//!     UserStory::new("B", "Login", vec!["A"]),
//!     UserStory::new("C", "Profile", vec!["A"]),
//! ];
//! let order = resolve_order(&stories)?;
//! assert_eq!(order[0].id, "A");
//! # Ok(())
//! # }
//! ```

mod builder;
mod order;

pub use builder::{GraphBuilder, StoryGraph, StoryIndex};
pub use order::resolve_order;
