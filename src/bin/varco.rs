use anyhow::Result;
use varco::cli::{actions, actions::Action, start};

#[tokio::main]
async fn main() -> Result<()> {
    // Start the program
    let action = start()?;

    // Handle the action
    match action {
        Action::Server(args) => actions::server::execute(*args).await?,
    }

    Ok(())
}
