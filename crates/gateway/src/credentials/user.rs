//! Credential access bound to one caller

use super::connection::GitConnection;
use super::store::CredentialStore;
use crate::auth::{Grant, Verb};
use crate::error::{Error, Result};
use scm::Provider;
use tracing::{debug, instrument};

/// The session user's own git-host credentials in the session's project.
///
/// Every call is keyed by the user the session was opened for. Writes need
/// an `update` grant; listing the project's connection metadata needs `list`.
pub struct UserCredentials {
    store: CredentialStore,
    user_id: String,
    grant: Grant,
}

impl std::fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCredentials")
            .field("namespace", &self.store.namespace())
            .field("provider", &self.store.provider())
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl UserCredentials {
    pub(crate) fn new(store: CredentialStore, user_id: &str, grant: Grant) -> Result<Self> {
        if user_id.trim().is_empty() {
            return Err(Error::Unauthenticated(
                "credentials require a resolved user".to_string(),
            ));
        }
        if store.namespace() != grant.namespace() {
            return Err(Error::forbidden(format!(
                "grant covers namespace {} not {}",
                grant.namespace(),
                store.namespace()
            )));
        }
        Ok(Self {
            store,
            user_id: user_id.to_string(),
            grant,
        })
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    #[must_use]
    pub fn provider(&self) -> Provider {
        self.store.provider()
    }

    /// The user's stored token
    pub async fn get(&self) -> Result<Option<String>> {
        self.store.get(&self.user_id).await
    }

    pub async fn has(&self) -> Result<bool> {
        self.store.has(&self.user_id).await
    }

    /// The user's connection metadata
    pub async fn connection(&self) -> Result<Option<GitConnection>> {
        self.store.get_connection(&self.user_id).await
    }

    /// Store the user's token; `connection` must describe this user
    #[instrument(skip(self, connection, token), fields(namespace = %self.namespace(), user = %self.user_id))]
    pub async fn store(&self, connection: &GitConnection, token: &str) -> Result<()> {
        self.grant.require_verb(Verb::Update)?;
        if connection.user_id != self.user_id {
            debug!(other = %connection.user_id, "Refusing to store another user's connection");
            return Err(Error::forbidden(
                "cannot store credentials for another user",
            ));
        }
        self.store.store(connection, token).await
    }

    /// Remove the user's token and metadata; nothing stored is success
    pub async fn delete(&self) -> Result<()> {
        self.grant.require_verb(Verb::Update)?;
        self.store.delete(&self.user_id).await
    }

    /// Connection metadata of everyone in the project. Tokens are never
    /// included.
    pub async fn project_connections(&self) -> Result<Vec<GitConnection>> {
        self.grant.require_verb(Verb::List)?;
        self.store.list_connections().await
    }

    /// Token git operations run with: the user's own, else the project's
    /// shared integration token
    pub async fn git_token(&self) -> Result<String> {
        self.store.resolve_git_token(&self.user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialConfig;
    use crate::retry::RetryPolicy;
    use crate::store::memory::MemoryApi;
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use std::sync::Arc;

    const NS: &str = "team-a";

    struct Project {
        secrets: Arc<MemoryApi<Secret>>,
        config_maps: Arc<MemoryApi<ConfigMap>>,
    }

    impl Project {
        fn new() -> Self {
            Self {
                secrets: Arc::new(MemoryApi::new()),
                config_maps: Arc::new(MemoryApi::new()),
            }
        }

        fn user(&self, user_id: &str, verbs: &[Verb]) -> UserCredentials {
            let store = CredentialStore::with_apis(
                self.secrets.clone(),
                self.config_maps.clone(),
                NS,
                Provider::GitHub,
                CredentialConfig::default(),
                RetryPolicy::immediate(3),
            );
            UserCredentials::new(
                store,
                user_id,
                Grant::for_tests(NS, "bugfixworkflows", verbs),
            )
            .unwrap()
        }
    }

    fn connection(user: &str) -> GitConnection {
        GitConnection::new(user, Provider::GitHub, "7", user)
    }

    #[tokio::test]
    async fn reads_only_see_the_session_user() {
        let project = Project::new();
        let bob = project.user("bob", &[Verb::Get, Verb::Update]);
        bob.store(&connection("bob"), "ghp_bob").await.unwrap();

        let alice = project.user("alice", &[Verb::Get]);
        assert!(alice.get().await.unwrap().is_none());
        assert!(!alice.has().await.unwrap());
        assert!(alice.connection().await.unwrap().is_none());

        assert_eq!(bob.get().await.unwrap().as_deref(), Some("ghp_bob"));
        assert_eq!(bob.git_token().await.unwrap(), "ghp_bob");
    }

    #[tokio::test]
    async fn writes_need_an_update_grant() {
        let project = Project::new();
        let alice = project.user("alice", &[Verb::Get]);

        assert!(matches!(
            alice.store(&connection("alice"), "ghp_a").await,
            Err(Error::Forbidden { .. })
        ));
        assert!(matches!(alice.delete().await, Err(Error::Forbidden { .. })));
        assert_eq!(project.secrets.writes(), 0);
        assert_eq!(project.config_maps.writes(), 0);
    }

    #[tokio::test]
    async fn cannot_store_for_another_user() {
        let project = Project::new();
        let alice = project.user("alice", &[Verb::Update]);

        let err = alice.store(&connection("bob"), "ghp_x").await.unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
        assert_eq!(project.secrets.writes(), 0);
    }

    #[tokio::test]
    async fn delete_leaves_other_users_alone() {
        let project = Project::new();
        let alice = project.user("alice", &[Verb::Update]);
        let bob = project.user("bob", &[Verb::Update]);
        alice.store(&connection("alice"), "ghp_a").await.unwrap();
        bob.store(&connection("bob"), "ghp_b").await.unwrap();

        alice.delete().await.unwrap();

        assert!(!alice.has().await.unwrap());
        assert_eq!(bob.get().await.unwrap().as_deref(), Some("ghp_b"));
    }

    #[tokio::test]
    async fn project_listing_needs_list() {
        let project = Project::new();
        let alice = project.user("alice", &[Verb::Update]);
        alice.store(&connection("alice"), "ghp_a").await.unwrap();
        assert!(matches!(
            alice.project_connections().await,
            Err(Error::Forbidden { .. })
        ));

        let lister = project.user("carol", &[Verb::List]);
        let listed = lister.project_connections().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].user_id, "alice");
    }

    #[test]
    fn requires_a_user_and_matching_namespace() {
        let project = Project::new();
        let store = || {
            CredentialStore::with_apis(
                project.secrets.clone(),
                project.config_maps.clone(),
                NS,
                Provider::GitHub,
                CredentialConfig::default(),
                RetryPolicy::immediate(0),
            )
        };

        let anonymous = UserCredentials::new(
            store(),
            " ",
            Grant::for_tests(NS, "bugfixworkflows", &[Verb::Get]),
        );
        assert!(matches!(anonymous, Err(Error::Unauthenticated(_))));

        let elsewhere = UserCredentials::new(
            store(),
            "alice",
            Grant::for_tests("team-b", "bugfixworkflows", &[Verb::Get]),
        );
        assert!(matches!(elsewhere, Err(Error::Forbidden { .. })));
    }
}
