//! Incremental story-execution engine.
//!
//! Stories are ordered by dependency and run one at a time through
//! generate, validate, build and integrate, with bounded automatic fixes.
//! Every accepted story is checkpointed so an interrupted execution resumes
//! without regenerating accepted work.

pub mod build;
pub mod checkpoint;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fixloop;
pub mod generate;
pub mod init;
pub mod integration;
pub mod manifest;
pub mod report;
pub mod story;
pub mod storyforge_config;
pub mod strategy;
pub mod ui;
pub mod util;
pub mod validate;
