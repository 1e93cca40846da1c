pub mod app;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod info;
pub mod runtime;
pub mod serve;
pub mod step;

pub use app::run;
pub use info::cmd_info;
pub use serve::{cmd_serve, ServeArgs};
pub use step::{cmd_step, StepArgs};
