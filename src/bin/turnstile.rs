use anyhow::Result;
use turnstile::cli::{actions, actions::Action, start, telemetry};

// Main function
#[tokio::main]
async fn main() -> Result<()> {
    // Start the program
    let action = start()?;

    // Handle the action
    let result = match action {
        Action::Server(args) => actions::server::handle(args).await,
    };

    telemetry::shutdown_tracer();

    result
}
