//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module      | Commands handled                          |
//! |-------------|-------------------------------------------|
//! | `project`   | `Init`                                    |
//! | `run`       | `Run`                                     |
//! | `order`     | `Order`                                   |
//! | `execution` | `Status`, `Report`, `Export`, `Reset`     |
//! | `config`    | `Config`                                  |

pub mod config;
pub mod execution;
pub mod order;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use execution::{cmd_export, cmd_report, cmd_reset, cmd_status};
pub use order::cmd_order;
pub use project::cmd_init;
pub use run::{RunOptions, cmd_run};

/// Execution id used when `--execution-id` is not given.
pub const DEFAULT_EXECUTION_ID: &str = "default";
