use clap::Subcommand;

use super::serve::ServeArgs;
use super::step::StepArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the HTTP decision service
    Serve(ServeArgs),

    /// Run one decision cycle for a request file and print the response
    Step(StepArgs),

    /// Show version and effective configuration
    Info,
}
