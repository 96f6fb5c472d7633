pub mod server;
pub mod sweep;

// The match lives in `run` so this file stays a plain list of actions.
mod run;

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Sweep(sweep::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
