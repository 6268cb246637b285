//! Function phase: configuration, environment variables, and the active
//! deployment's code archive.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use super::TransferExecutor;
use crate::api::models::Function;
use crate::error::Result;
use crate::plan::{MigrationPlan, MigrationResource};

impl TransferExecutor {
    pub(crate) async fn phase_functions(&self, plan: &MigrationPlan) -> Result<()> {
        for node in plan.enabled_functions() {
            self.check_cancelled()?;
            let Some(detail) = Self::function_detail(node) else {
                continue;
            };

            let freshly_created = match self.dest.get_function(&node.target_id).await {
                Ok(Some(_)) => {
                    debug!("Function {} already exists, skipping", node.target_id);
                    self.note_skipped("function");
                    false
                }
                Ok(None) => {
                    let mut created = detail.clone();
                    created.id = node.target_id.clone();
                    created.name = node.target_name.clone();
                    // The active deployment ID is source-local state.
                    created.deployment = String::new();
                    match self.dest.create_function(&created).await {
                        Ok(()) => {
                            self.note_created("function");
                            true
                        }
                        Err(e) => {
                            error!("Failed to create function {}: {}", node.target_id, e);
                            self.note_failed("function");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to look up function {}: {}", node.target_id, e);
                    self.note_failed("function");
                    continue;
                }
            };

            if let Err(e) = self.copy_function_variables(node).await {
                error!(
                    "Failed to copy variables of function {}: {}",
                    node.target_id, e
                );
            }

            // An existing function keeps whatever deployment it has; code is
            // only shipped alongside a fresh creation.
            if freshly_created && !detail.deployment.is_empty() {
                if let Err(e) = self.copy_active_deployment(node, detail).await {
                    error!(
                        "Failed to copy deployment of function {}: {}",
                        node.target_id, e
                    );
                    self.note_failed("deployment");
                }
            } else if freshly_created {
                warn!(
                    "Function {} has no active deployment, copied configuration only",
                    node.target_id
                );
            }
        }
        Ok(())
    }

    /// Diff environment variables by key and create the missing ones.
    async fn copy_function_variables(&self, node: &MigrationResource) -> Result<()> {
        let source_vars = self.source.list_variables(&node.source_id).await?;
        if source_vars.variables.is_empty() {
            return Ok(());
        }
        let existing = self.dest.list_variables(&node.target_id).await?;
        let existing: HashSet<&str> = existing.variables.iter().map(|v| v.key.as_str()).collect();

        for variable in &source_vars.variables {
            if existing.contains(variable.key.as_str()) {
                self.note_skipped("variable");
                continue;
            }
            match self.dest.create_variable(&node.target_id, variable).await {
                Ok(()) => self.note_created("variable"),
                Err(e) => {
                    error!(
                        "Failed to create variable {} on function {}: {}",
                        variable.key, node.target_id, e
                    );
                    self.note_failed("variable");
                }
            }
        }
        Ok(())
    }

    /// Pull the active deployment's code archive and re-deploy it, activated.
    async fn copy_active_deployment(
        &self,
        node: &MigrationResource,
        detail: &Function,
    ) -> Result<()> {
        let code = self
            .source
            .download_deployment(&node.source_id, &detail.deployment)
            .await?;
        info!(
            "Re-deploying {} bytes of code to function {}",
            code.len(),
            node.target_id
        );
        self.dest
            .create_deployment(
                &node.target_id,
                code,
                &detail.entrypoint,
                &detail.commands,
                true,
            )
            .await?;
        self.note_created("deployment");
        Ok(())
    }
}
