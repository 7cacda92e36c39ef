use super::file::StateAction;
use super::{MigrationMetadata, Migrator};
use crate::context::ExecContext;
use crate::error::{Error, Result};
use crate::tfexec::{State, TerraformCli};
use std::fs;
use std::path::PathBuf;

/// Replays state actions on a pulled copy of remote state.
///
/// Every action edits the in-memory state; remote state changes only when
/// `apply` pushes the final result.
pub struct StateMigrator<C> {
    tf: C,
    metadata: MigrationMetadata,
    actions: Vec<StateAction>,
    plan_out: Option<PathBuf>,
    init: bool,
}

impl<C: TerraformCli> StateMigrator<C> {
    pub fn new(tf: C, metadata: MigrationMetadata, actions: Vec<StateAction>) -> Self {
        Self {
            tf,
            metadata,
            actions,
            plan_out: None,
            init: false,
        }
    }

    pub fn with_plan_out(mut self, plan_out: Option<PathBuf>) -> Self {
        self.plan_out = plan_out;
        self
    }

    pub fn with_init(mut self, init: bool) -> Self {
        self.init = init;
        self
    }

    fn migrate(&self, ctx: &ExecContext) -> Result<State> {
        if self.init {
            self.tf.init(ctx)?;
        }
        let mut state = self.tf.state_pull(ctx)?;
        for action in &self.actions {
            tracing::debug!(migration = %self.metadata.name, ?action, "state action");
            state = match action {
                StateAction::Mv {
                    source,
                    destination,
                } => self.tf.state_mv(ctx, &state, source, destination)?,
                StateAction::Rm { addresses } => self.tf.state_rm(ctx, &state, addresses)?,
                StateAction::Import { address, id } => {
                    self.tf.import(ctx, &state, address, id)?
                }
            };
        }
        Ok(state)
    }
}

impl<C: TerraformCli> Migrator for StateMigrator<C> {
    fn plan(&self, ctx: &ExecContext) -> Result<()> {
        let state = self.migrate(ctx)?;
        tracing::info!(
            migration = %self.metadata.name,
            actions = self.actions.len(),
            state_bytes = state.len(),
            "plan ok"
        );
        if let Some(path) = &self.plan_out {
            fs::write(path, state.as_bytes())
                .map_err(|err| Error::io(format!("write plan output {}", path.display()), err))?;
        }
        Ok(())
    }

    fn apply(&self, ctx: &ExecContext) -> Result<()> {
        let state = self.migrate(ctx)?;
        self.tf.state_push(ctx, &state)?;
        tracing::info!(
            migration = %self.metadata.name,
            actions = self.actions.len(),
            "state pushed"
        );
        Ok(())
    }

    fn metadata(&self) -> &MigrationMetadata {
        &self.metadata
    }
}
