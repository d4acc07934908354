use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::users::{
    dto::{Credentials, NewUser, Password, PublicUser, UsernameChange},
    errors::UserError,
    password::CredentialHasher,
    repo::{StorageError, UserStore},
    repo_types::{NewUserRow, User},
};

const USERNAME_TAKEN: &str = "Username is already taken";
const EMAIL_TAKEN: &str = "Email is already registered";

/// Identity operations. Each call is a short read-check-write sequence
/// against the store; nothing is kept between calls.
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    hasher: CredentialHasher,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, hasher: CredentialHasher) -> Self {
        Self { store, hasher }
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<PublicUser>, UserError> {
        let users = self.store.list_all().await?;
        Ok(users.into_iter().map(PublicUser::from).collect())
    }

    #[instrument(skip(self, new_user), fields(username = %new_user.username))]
    pub async fn create_user(&self, new_user: NewUser) -> Result<PublicUser, UserError> {
        if self
            .store
            .find_by_username_ci(&new_user.username)
            .await?
            .is_some()
        {
            warn!("username already taken");
            return Err(UserError::Conflict(USERNAME_TAKEN.into()));
        }
        if self.store.find_by_email_ci(&new_user.email).await?.is_some() {
            warn!("email already registered");
            return Err(UserError::Conflict(EMAIL_TAKEN.into()));
        }

        let password_hash = self.hasher.hash(&new_user.password).await?;
        let user = self
            .store
            .insert(NewUserRow {
                id: Uuid::new_v4(),
                username: new_user.username,
                email: new_user.email,
                password_hash,
            })
            .await
            .map_err(conflict_or_storage)?;

        info!(user_id = %user.id, "user created");
        Ok(user.into())
    }

    #[instrument(skip(self))]
    pub async fn get_user_for_edit(&self, id: Uuid) -> Result<PublicUser, UserError> {
        Ok(self.load(id).await?.into())
    }

    /// Password re-entry is required even for a signed-in session.
    #[instrument(skip(self, change), fields(new_username = %change.new_username))]
    pub async fn update_username(
        &self,
        id: Uuid,
        change: UsernameChange,
    ) -> Result<PublicUser, UserError> {
        let user = self.load(id).await?;
        self.check_password(&user, &change.password).await?;

        let taken = self
            .store
            .find_by_username_ci(&change.new_username)
            .await?
            .filter(|other| other.id != id);
        if taken.is_some() {
            warn!(user_id = %id, "username already taken");
            return Err(UserError::Conflict(USERNAME_TAKEN.into()));
        }

        let updated = self
            .store
            .update_username(id, &change.new_username)
            .await
            .map_err(conflict_or_storage)?;
        if !updated {
            // deleted between the gate and the write
            return Err(UserError::NotFound);
        }

        info!(user_id = %id, "username updated");
        Ok(PublicUser {
            username: change.new_username,
            ..PublicUser::from(user)
        })
    }

    #[instrument(skip(self, password))]
    pub async fn delete_user(&self, id: Uuid, password: &Password) -> Result<(), UserError> {
        let user = self.load(id).await?;
        self.check_password(&user, password).await?;

        if !self.store.delete_by_id(id).await? {
            return Err(UserError::NotFound);
        }
        info!(user_id = %id, "user deleted");
        Ok(())
    }

    /// Proof of identity only; no token or session is issued here.
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn authenticate(&self, credentials: Credentials) -> Result<PublicUser, UserError> {
        let user = self
            .store
            .find_by_username_ci(&credentials.username)
            .await?
            .ok_or_else(|| {
                warn!("sign-in for unknown username");
                UserError::NotFound
            })?;
        self.check_password(&user, &credentials.password).await?;

        info!(user_id = %user.id, "user authenticated");
        Ok(user.into())
    }

    async fn load(&self, id: Uuid) -> Result<User, UserError> {
        self.store.find_by_id(id).await?.ok_or(UserError::NotFound)
    }

    async fn check_password(&self, user: &User, candidate: &Password) -> Result<(), UserError> {
        if self.hasher.verify(candidate, &user.password_hash).await? {
            Ok(())
        } else {
            warn!(user_id = %user.id, "password mismatch");
            Err(UserError::Authentication)
        }
    }
}

fn conflict_or_storage(e: StorageError) -> UserError {
    match e {
        StorageError::Conflict { constraint } if constraint.contains("email") => {
            UserError::Conflict(EMAIL_TAKEN.into())
        }
        StorageError::Conflict { .. } => UserError::Conflict(USERNAME_TAKEN.into()),
        other => UserError::Storage(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{memory::MemoryUserStore, password::test_hasher};
    use async_trait::async_trait;

    fn service() -> (UserService, Arc<MemoryUserStore>) {
        let store = Arc::new(MemoryUserStore::new());
        let service = UserService::new(store.clone(), test_hasher());
        (service, store)
    }

    fn new_user(username: &str, email: &str, password: &str) -> NewUser {
        NewUser::parse(
            Some(username.into()),
            Some(email.into()),
            Some(Password::new(password)),
        )
        .unwrap()
    }

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials::parse(Some(username.into()), Some(Password::new(password))).unwrap()
    }

    fn change(username: &str, password: &str) -> UsernameChange {
        UsernameChange::parse(Some(username.into()), Some(Password::new(password))).unwrap()
    }

    #[tokio::test]
    async fn created_user_hash_verifies_and_is_not_plaintext() {
        let (svc, store) = service();
        let created = svc
            .create_user(new_user("carol", "carol@x.com", "pa55word"))
            .await
            .unwrap();

        let fetched = svc.get_user_for_edit(created.id).await.unwrap();
        assert_eq!(fetched, created);

        let row = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_ne!(row.password_hash, "pa55word");
        assert!(test_hasher()
            .verify(&Password::new("pa55word"), &row.password_hash)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_everywhere() {
        let (svc, _) = service();
        let missing = Uuid::new_v4();

        assert!(matches!(
            svc.get_user_for_edit(missing).await,
            Err(UserError::NotFound)
        ));
        assert!(matches!(
            svc.update_username(missing, change("x", "pw")).await,
            Err(UserError::NotFound)
        ));
        assert!(matches!(
            svc.delete_user(missing, &Password::new("pw")).await,
            Err(UserError::NotFound)
        ));
    }

    #[tokio::test]
    async fn wrong_password_never_mutates_username() {
        let (svc, _) = service();
        let u = svc
            .create_user(new_user("dave", "dave@x.com", "right"))
            .await
            .unwrap();

        let err = svc.update_username(u.id, change("x", "wrong")).await;
        assert!(matches!(err, Err(UserError::Authentication)));
        assert_eq!(svc.get_user_for_edit(u.id).await.unwrap().username, "dave");
    }

    #[tokio::test]
    async fn wrong_password_never_deletes() {
        let (svc, _) = service();
        let u = svc
            .create_user(new_user("erin", "erin@x.com", "right"))
            .await
            .unwrap();

        let err = svc.delete_user(u.id, &Password::new("wrong")).await;
        assert!(matches!(err, Err(UserError::Authentication)));
        assert!(svc.get_user_for_edit(u.id).await.is_ok());
    }

    #[tokio::test]
    async fn second_delete_is_not_found() {
        let (svc, _) = service();
        let u = svc
            .create_user(new_user("frank", "frank@x.com", "pw"))
            .await
            .unwrap();

        svc.delete_user(u.id, &Password::new("pw")).await.unwrap();
        assert!(matches!(
            svc.delete_user(u.id, &Password::new("pw")).await,
            Err(UserError::NotFound)
        ));
    }

    #[tokio::test]
    async fn authenticate_ignores_username_case() {
        let (svc, _) = service();
        svc.create_user(new_user("Alice", "alice@x.com", "pw"))
            .await
            .unwrap();

        assert_eq!(svc.authenticate(creds("Alice", "pw")).await.unwrap().username, "Alice");
        assert_eq!(svc.authenticate(creds("ALICE", "pw")).await.unwrap().username, "Alice");
        assert!(matches!(
            svc.authenticate(creds("nobody", "pw")).await,
            Err(UserError::NotFound)
        ));
    }

    #[tokio::test]
    async fn bob_lifecycle() {
        let (svc, _) = service();
        let bob = svc
            .create_user(new_user("bob", "bob@x.com", "s3cret"))
            .await
            .unwrap();

        let proof = svc.authenticate(creds("bob", "s3cret")).await.unwrap();
        assert_eq!(proof.id, bob.id);
        assert!(matches!(
            svc.authenticate(creds("bob", "wrong")).await,
            Err(UserError::Authentication)
        ));

        svc.update_username(bob.id, change("bobby", "s3cret"))
            .await
            .unwrap();
        assert_eq!(svc.get_user_for_edit(bob.id).await.unwrap().username, "bobby");

        svc.delete_user(bob.id, &Password::new("s3cret")).await.unwrap();
        assert!(matches!(
            svc.get_user_for_edit(bob.id).await,
            Err(UserError::NotFound)
        ));
    }

    #[tokio::test]
    async fn list_keeps_insertion_order() {
        let (svc, _) = service();
        for name in ["zed", "amy", "mo"] {
            svc.create_user(new_user(name, &format!("{name}@x.com"), "pw"))
                .await
                .unwrap();
        }
        let names: Vec<String> = svc
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, ["zed", "amy", "mo"]);
    }

    #[tokio::test]
    async fn duplicate_username_or_email_is_conflict() {
        let (svc, _) = service();
        svc.create_user(new_user("gina", "gina@x.com", "pw"))
            .await
            .unwrap();

        assert!(matches!(
            svc.create_user(new_user("GINA", "other@x.com", "pw")).await,
            Err(UserError::Conflict(msg)) if msg == USERNAME_TAKEN
        ));
        assert!(matches!(
            svc.create_user(new_user("gina2", "Gina@X.com", "pw")).await,
            Err(UserError::Conflict(msg)) if msg == EMAIL_TAKEN
        ));
    }

    #[tokio::test]
    async fn rename_to_taken_username_is_conflict_but_own_case_change_is_fine() {
        let (svc, _) = service();
        let hal = svc
            .create_user(new_user("hal", "hal@x.com", "pw"))
            .await
            .unwrap();
        svc.create_user(new_user("ivy", "ivy@x.com", "pw"))
            .await
            .unwrap();

        assert!(matches!(
            svc.update_username(hal.id, change("Ivy", "pw")).await,
            Err(UserError::Conflict(_))
        ));
        let renamed = svc.update_username(hal.id, change("HAL", "pw")).await.unwrap();
        assert_eq!(renamed.username, "HAL");
    }

    struct DownStore;

    #[async_trait]
    impl UserStore for DownStore {
        async fn list_all(&self) -> Result<Vec<User>, StorageError> {
            Err(sqlx::Error::PoolTimedOut.into())
        }
        async fn find_by_id(&self, _: Uuid) -> Result<Option<User>, StorageError> {
            Err(sqlx::Error::PoolTimedOut.into())
        }
        async fn find_by_username_ci(&self, _: &str) -> Result<Option<User>, StorageError> {
            Err(sqlx::Error::PoolTimedOut.into())
        }
        async fn find_by_email_ci(&self, _: &str) -> Result<Option<User>, StorageError> {
            Err(sqlx::Error::PoolTimedOut.into())
        }
        async fn insert(&self, _: NewUserRow) -> Result<User, StorageError> {
            Err(sqlx::Error::PoolTimedOut.into())
        }
        async fn update_username(&self, _: Uuid, _: &str) -> Result<bool, StorageError> {
            Err(sqlx::Error::PoolTimedOut.into())
        }
        async fn delete_by_id(&self, _: Uuid) -> Result<bool, StorageError> {
            Err(sqlx::Error::PoolTimedOut.into())
        }
    }

    #[tokio::test]
    async fn storage_failures_surface_as_storage_errors() {
        let svc = UserService::new(Arc::new(DownStore), test_hasher());
        assert!(matches!(svc.list_users().await, Err(UserError::Storage(_))));
        assert!(matches!(
            svc.create_user(new_user("jo", "jo@x.com", "pw")).await,
            Err(UserError::Storage(_))
        ));
        assert!(matches!(
            svc.authenticate(creds("jo", "pw")).await,
            Err(UserError::Storage(_))
        ));
    }

    #[test]
    fn unique_violations_name_the_offending_field() {
        let email = conflict_or_storage(StorageError::Conflict {
            constraint: "users_email_lower_key".into(),
        });
        assert!(matches!(email, UserError::Conflict(msg) if msg == EMAIL_TAKEN));
        let name = conflict_or_storage(StorageError::Conflict {
            constraint: "users_username_lower_key".into(),
        });
        assert!(matches!(name, UserError::Conflict(msg) if msg == USERNAME_TAKEN));
    }
}
