pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod gate;
pub mod logs;
pub mod output;
pub mod rehearse;
pub mod reset;
pub mod runtime;

pub use config::{cmd_config, ConfigArgs};
pub use gate::{cmd_gate, GateArgs};
pub use logs::{cmd_logs, LogsArgs};
pub use rehearse::{cmd_rehearse, RehearseArgs};
pub use reset::{cmd_reset, ResetArgs};
