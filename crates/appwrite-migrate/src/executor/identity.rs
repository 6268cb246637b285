//! Identity phases: user accounts, then teams with memberships.
//!
//! Users whose password hash uses a scheme the destination can import are
//! recreated with working credentials. Anything else (custom KDFs, missing
//! hashes) degrades to a passwordless account; the account, profile, and
//! verification state survive, the password does not. That trade is logged
//! per user so operators can plan a reset campaign.

use std::collections::HashSet;

use tracing::{debug, error, warn};

use super::{TransferExecutor, SCHEMA_PAGE_SIZE};
use crate::api::models::User;
use crate::api::has_portable_hash;
use crate::error::Result;
use crate::plan::{MigrationPlan, MigrationResource};

impl TransferExecutor {
    pub(crate) async fn phase_users(&self, plan: &MigrationPlan) -> Result<()> {
        for node in plan.enabled_users() {
            self.check_cancelled()?;
            let Some(user) = Self::user_detail(node) else {
                continue;
            };

            match self.dest.get_user(&node.target_id).await {
                Ok(Some(_)) => {
                    debug!("User {} already exists, skipping", node.target_id);
                    self.note_skipped("user");
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to look up user {}: {}", node.target_id, e);
                    self.note_failed("user");
                    continue;
                }
            }

            let mut record = user.clone();
            record.id = node.target_id.clone();
            let creation = if has_portable_hash(user) {
                self.dest.create_user_with_hash(&record).await
            } else {
                warn!(
                    "User {} carries no importable password hash (scheme: {}), creating without credentials",
                    node.target_id,
                    user.hash.as_deref().unwrap_or("none")
                );
                self.dest.create_user_plain(&record).await
            };

            match creation {
                Ok(()) => {
                    self.note_created("user");
                    self.apply_user_profile(&node.target_id, user).await;
                }
                Err(e) => {
                    error!("Failed to create user {}: {}", node.target_id, e);
                    self.note_failed("user");
                }
            }
        }
        Ok(())
    }

    /// Push profile fields that differ from creation defaults. Everything
    /// else is left alone so the destination's own defaults apply.
    async fn apply_user_profile(&self, user_id: &str, user: &User) {
        if !user.status {
            if let Err(e) = self.dest.update_user_status(user_id, false).await {
                warn!("Failed to block user {}: {}", user_id, e);
            }
        }
        if user.email_verification {
            if let Err(e) = self.dest.update_email_verification(user_id, true).await {
                warn!("Failed to mark email of {} verified: {}", user_id, e);
            }
        }
        if user.phone_verification {
            if let Err(e) = self.dest.update_phone_verification(user_id, true).await {
                warn!("Failed to mark phone of {} verified: {}", user_id, e);
            }
        }
        if !user.labels.is_empty() {
            if let Err(e) = self.dest.update_user_labels(user_id, &user.labels).await {
                warn!("Failed to set labels of {}: {}", user_id, e);
            }
        }
        if let Some(prefs) = &user.prefs {
            let empty = prefs.as_object().map(|o| o.is_empty()).unwrap_or(true);
            if !empty {
                if let Err(e) = self.dest.update_user_prefs(user_id, prefs).await {
                    warn!("Failed to set prefs of {}: {}", user_id, e);
                }
            }
        }
    }

    pub(crate) async fn phase_teams(&self, plan: &MigrationPlan) -> Result<()> {
        for node in plan.enabled_teams() {
            self.check_cancelled()?;
            let Some(team) = Self::team_detail(node) else {
                continue;
            };

            match self.dest.get_team(&node.target_id).await {
                Ok(Some(_)) => self.note_skipped("team"),
                Ok(None) => {
                    let mut created = team.clone();
                    created.id = node.target_id.clone();
                    created.name = node.target_name.clone();
                    match self.dest.create_team(&created).await {
                        Ok(()) => self.note_created("team"),
                        Err(e) => {
                            error!("Failed to create team {}: {}", node.target_id, e);
                            self.note_failed("team");
                            continue;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to look up team {}: {}", node.target_id, e);
                    self.note_failed("team");
                    continue;
                }
            }

            if let Err(e) = self.copy_team_memberships(node).await {
                error!(
                    "Failed to copy memberships of team {}: {}",
                    node.target_id, e
                );
            }
        }
        Ok(())
    }

    async fn copy_team_memberships(&self, node: &MigrationResource) -> Result<()> {
        let source_members = self
            .source
            .list_memberships(&node.source_id, SCHEMA_PAGE_SIZE)
            .await?;
        if source_members.memberships.is_empty() {
            return Ok(());
        }
        let existing = self
            .dest
            .list_memberships(&node.target_id, SCHEMA_PAGE_SIZE)
            .await?;
        let existing: HashSet<&str> = existing
            .memberships
            .iter()
            .map(|m| m.user_email.as_str())
            .collect();

        for membership in &source_members.memberships {
            if membership.user_email.is_empty() || existing.contains(membership.user_email.as_str())
            {
                self.note_skipped("membership");
                continue;
            }
            match self
                .dest
                .create_membership(&node.target_id, &membership.user_email, &membership.roles)
                .await
            {
                Ok(()) => self.note_created("membership"),
                // Invites routinely fail for accounts that were not migrated;
                // the team itself is still usable.
                Err(e) => {
                    warn!(
                        "Failed to invite {} to team {}: {}",
                        membership.user_email, node.target_id, e
                    );
                    self.note_failed("membership");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::executor;
    use crate::api::models::{Membership, Team, User};
    use crate::api::{MockProjectApi, ProjectApi};
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::config::MigrationOptions;
    use crate::scanner::Scanner;
    use serde_json::json;
    use std::sync::Arc;

    fn user(id: &str, hash: Option<&str>, password: Option<&str>) -> User {
        User {
            id: id.to_string(),
            name: id.to_string(),
            email: format!("{}@example.com", id),
            phone: String::new(),
            password: password.map(str::to_string),
            hash: hash.map(str::to_string),
            hash_options: None,
            status: true,
            email_verification: false,
            phone_verification: false,
            labels: vec![],
            prefs: None,
        }
    }

    fn users_only() -> MigrationOptions {
        MigrationOptions {
            migrate_databases: false,
            migrate_documents: false,
            migrate_storage: false,
            migrate_functions: false,
            migrate_teams: false,
            migrate_files: false,
            ..MigrationOptions::default()
        }
    }

    fn teams_only() -> MigrationOptions {
        MigrationOptions {
            migrate_databases: false,
            migrate_documents: false,
            migrate_storage: false,
            migrate_functions: false,
            migrate_users: false,
            migrate_files: false,
            ..MigrationOptions::default()
        }
    }

    #[tokio::test]
    async fn test_portable_hash_imported_directly() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        source.add_user(user("alice", Some("bcrypt"), Some("$2a$10$abc")));

        let plan = Scanner::new(source.clone()).scan(&users_only()).await.unwrap();
        executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        assert_eq!(dest.ops_with_prefix("create_user_with_hash alice bcrypt"), 1);
        assert_eq!(dest.ops_with_prefix("create_user_plain"), 0);
        let copied = dest.get_user("alice").await.unwrap().unwrap();
        assert_eq!(copied.password.as_deref(), Some("$2a$10$abc"));
    }

    #[tokio::test]
    async fn test_unknown_scheme_degrades_to_passwordless() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        source.add_user(user("bob", Some("pbkdf2-custom"), Some("xxxx")));
        source.add_user(user("carol", None, None));

        let plan = Scanner::new(source.clone()).scan(&users_only()).await.unwrap();
        let summary = executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        assert_eq!(summary.counts("user").created, 2);
        assert_eq!(dest.ops_with_prefix("create_user_plain"), 2);
        let copied = dest.get_user("bob").await.unwrap().unwrap();
        assert!(copied.password.is_none());
    }

    #[tokio::test]
    async fn test_profile_updates_only_for_deviating_fields() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        // Plain default user: no follow-up updates expected.
        source.add_user(user("plain", Some("bcrypt"), Some("$2a$10$a")));
        // Fully decorated user: every follow-up expected.
        let mut decorated = user("decorated", Some("bcrypt"), Some("$2a$10$b"));
        decorated.status = false;
        decorated.email_verification = true;
        decorated.phone_verification = true;
        decorated.labels = vec!["admin".to_string()];
        decorated.prefs = Some(json!({"theme": "dark"}));
        source.add_user(decorated);

        let plan = Scanner::new(source.clone()).scan(&users_only()).await.unwrap();
        executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        assert_eq!(dest.ops_with_prefix("update_user_status plain"), 0);
        assert_eq!(dest.ops_with_prefix("update_email_verification plain"), 0);
        assert_eq!(dest.ops_with_prefix("update_user_labels plain"), 0);
        assert_eq!(dest.ops_with_prefix("update_user_prefs plain"), 0);

        assert_eq!(dest.ops_with_prefix("update_user_status decorated false"), 1);
        assert_eq!(
            dest.ops_with_prefix("update_email_verification decorated true"),
            1
        );
        assert_eq!(
            dest.ops_with_prefix("update_phone_verification decorated true"),
            1
        );
        assert_eq!(dest.ops_with_prefix("update_user_labels decorated"), 1);
        assert_eq!(dest.ops_with_prefix("update_user_prefs decorated"), 1);
    }

    #[tokio::test]
    async fn test_team_members_invited_and_failures_tolerated() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        source.add_team(Team {
            id: "staff".to_string(),
            name: "Staff".to_string(),
            prefs: None,
        });
        for (i, email) in ["a@example.com", "b@example.com"].iter().enumerate() {
            source.add_membership(
                "staff",
                Membership {
                    id: format!("m{}", i),
                    user_id: format!("u{}", i),
                    user_email: email.to_string(),
                    user_name: String::new(),
                    roles: vec!["member".to_string()],
                },
            );
        }
        dest.fail_always("create_membership staff/b@example.com");

        let plan = Scanner::new(source.clone()).scan(&teams_only()).await.unwrap();
        let summary = executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        assert_eq!(summary.counts("team").created, 1);
        assert_eq!(summary.counts("membership").created, 1);
        assert_eq!(summary.counts("membership").failed, 1);
    }

    #[tokio::test]
    async fn test_existing_members_not_reinvited() {
        let source = Arc::new(MockProjectApi::new("src"));
        let dest = Arc::new(MockProjectApi::new("dst"));
        let store = Arc::new(MemoryCheckpointStore::new());

        source.add_team(Team {
            id: "staff".to_string(),
            name: "Staff".to_string(),
            prefs: None,
        });
        source.add_membership(
            "staff",
            Membership {
                id: "m1".to_string(),
                user_id: "u1".to_string(),
                user_email: "a@example.com".to_string(),
                user_name: String::new(),
                roles: vec!["owner".to_string()],
            },
        );

        let plan = Scanner::new(source.clone()).scan(&teams_only()).await.unwrap();
        executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();
        // Second run: team and membership both present already.
        let summary = executor(&source, &dest, &store)
            .execute(&plan, false)
            .await
            .unwrap();

        assert_eq!(dest.ops_with_prefix("create_membership"), 1);
        assert_eq!(summary.counts("membership").skipped, 1);
        assert_eq!(summary.counts("team").skipped, 1);
    }
}
