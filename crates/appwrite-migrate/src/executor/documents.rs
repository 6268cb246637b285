//! Document phase: cursor-paged bulk copy with per-item checkpointing.

use futures::future::join_all;
use tracing::{error, info};

use super::{TransferExecutor, DOCUMENT_PAGE_SIZE};
use crate::api::models::Document;
use crate::checkpoint::checkpoint_key;
use crate::error::Result;
use crate::plan::{MigrationPlan, MigrationResource};

impl TransferExecutor {
    pub(crate) async fn phase_documents(&self, plan: &MigrationPlan, resume: bool) -> Result<()> {
        for db in plan.enabled_databases() {
            for coll in db.enabled_children() {
                self.copy_collection_documents(db, coll, resume).await?;
            }
        }
        Ok(())
    }

    async fn copy_collection_documents(
        &self,
        db: &MigrationResource,
        coll: &MigrationResource,
        resume: bool,
    ) -> Result<()> {
        let key = checkpoint_key(
            self.source.project_id(),
            self.dest.project_id(),
            "document",
            &format!("{}/{}", db.target_id, coll.target_id),
        );
        let mut cursor = if resume { self.checkpoints.get(&key)? } else { None };
        if let Some(c) = &cursor {
            info!(
                "Resuming documents of {}/{} after {}",
                db.target_id, coll.target_id, c
            );
        }

        loop {
            self.check_cancelled()?;
            // A listing failure is a phase-setup failure: propagate, keeping
            // the cursor in place for resumption.
            let page = self
                .source
                .list_documents(
                    &db.source_id,
                    &coll.source_id,
                    DOCUMENT_PAGE_SIZE,
                    cursor.as_deref(),
                )
                .await?;
            if page.documents.is_empty() {
                break;
            }

            let results = join_all(
                page.documents
                    .iter()
                    .map(|doc| self.copy_document(db, coll, doc)),
            )
            .await;

            // Advance the cursor item by item, in page order, so a crash
            // mid-loop never skips an unprocessed document on resume.
            for (doc, outcome) in page.documents.iter().zip(results) {
                match outcome {
                    Ok(true) => self.note_created("document"),
                    Ok(false) => self.note_skipped("document"),
                    Err(e) => {
                        error!(
                            "Failed to copy document {}/{}/{}: {}",
                            db.target_id,
                            coll.target_id,
                            doc.id(),
                            e
                        );
                        self.note_failed("document");
                    }
                }
                self.checkpoints.save(&key, doc.id())?;
            }

            let fetched = page.documents.len();
            cursor = page.documents.last().map(|d| d.id().to_string());
            if fetched < DOCUMENT_PAGE_SIZE as usize {
                break;
            }
        }
        Ok(())
    }

    /// Copy one document; `Ok(true)` means created, `Ok(false)` already there.
    async fn copy_document(
        &self,
        db: &MigrationResource,
        coll: &MigrationResource,
        doc: &Document,
    ) -> Result<bool> {
        if self
            .dest
            .get_document(&db.target_id, &coll.target_id, doc.id())
            .await?
            .is_some()
        {
            return Ok(false);
        }
        self.dest
            .create_document(
                &db.target_id,
                &coll.target_id,
                doc.id(),
                doc.payload(),
                &doc.permissions(),
            )
            .await?;
        Ok(true)
    }
}
