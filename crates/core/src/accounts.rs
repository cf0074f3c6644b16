use crate::error::AccountError;
use crate::models::{RequestContext, Team, TeamMember, TeamRole, User};
use crate::stores::SqliteStore;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Accounts {
    store: SqliteStore,
}

impl Accounts {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<User, AccountError> {
        let email = normalize_email(email)?;
        if password.is_empty() {
            return Err(AccountError::InvalidArgument(
                "password cannot be empty".to_string(),
            ));
        }
        if self.store.user_by_email(&email).await?.is_some() {
            return Err(AccountError::DuplicateUser(email));
        }

        let hash = hash_password(password)?;
        let display_name = display_name.map(str::trim).filter(|name| !name.is_empty());
        let user = self.store.insert_user(&email, display_name, &hash).await?;
        info!(user_id = %user.id, email = %user.email, "created user");
        Ok(user)
    }

    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AccountError> {
        let email = normalize_email(email)?;
        let Some((user, hash)) = self.store.user_credentials(&email).await? else {
            debug!(%email, "login for unknown email");
            return Ok(None);
        };

        if verify_password(password, &hash)? {
            Ok(Some(user))
        } else {
            debug!(user_id = %user.id, "password mismatch");
            Ok(None)
        }
    }

    /// Team names are unique. The creator becomes the team's admin.
    pub async fn create_team(
        &self,
        creator: &User,
        name: &str,
        description: Option<&str>,
    ) -> Result<Team, AccountError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AccountError::InvalidArgument(
                "team name cannot be empty".to_string(),
            ));
        }
        if self.store.team_name_exists(name).await? {
            return Err(AccountError::DuplicateTeam(name.to_string()));
        }

        let description = description.map(str::trim).filter(|text| !text.is_empty());
        let (team, _) = self
            .store
            .insert_team_with_admin(name, description, creator.id)
            .await?;
        info!(team_id = %team.id, name = %team.name, "created team");
        Ok(team)
    }

    /// Adds the user with `email` to the context team. Only team admins may
    /// add members.
    pub async fn add_member(
        &self,
        ctx: &RequestContext,
        email: &str,
        role: TeamRole,
    ) -> Result<TeamMember, AccountError> {
        let acting = self
            .store
            .membership(ctx.team_id, ctx.user_id)
            .await?
            .ok_or(AccountError::TeamNotFound(ctx.team_id))?;
        if acting.role != TeamRole::Admin {
            return Err(AccountError::NotAdmin);
        }

        let email = normalize_email(email)?;
        let user = self
            .store
            .user_by_email(&email)
            .await?
            .ok_or_else(|| AccountError::UnknownUser(email.clone()))?;
        if self.store.membership(ctx.team_id, user.id).await?.is_some() {
            return Err(AccountError::DuplicateMember(ctx.team_id));
        }

        let member = self.store.insert_member(ctx.team_id, user.id, role).await?;
        info!(
            team_id = %ctx.team_id,
            user_id = %user.id,
            role = role.as_str(),
            "added team member"
        );
        Ok(member)
    }

    pub async fn teams_for(&self, user: &User) -> Result<Vec<Team>, AccountError> {
        Ok(self.store.teams_for_user(user.id).await?)
    }
}

fn normalize_email(email: &str) -> Result<String, AccountError> {
    let email = email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AccountError::InvalidArgument(format!(
            "invalid email address: {email:?}"
        )));
    }
    Ok(email)
}

fn hash_password(password: &str) -> Result<String, AccountError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| AccountError::Password(error.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, AccountError> {
    let parsed =
        PasswordHash::new(hash).map_err(|error| AccountError::Password(error.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn accounts() -> Accounts {
        Accounts::new(SqliteStore::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn users_authenticate_with_their_password() {
        let accounts = accounts().await;
        let user = accounts
            .create_user(" Ana@Example.com ", "s3cret", Some("Ana"))
            .await
            .unwrap();
        assert_eq!(user.email, "ana@example.com");

        let found = accounts.authenticate("ana@example.com", "s3cret").await.unwrap();
        assert_eq!(found.map(|user| user.id), Some(user.id));
        assert!(accounts.authenticate("ana@example.com", "wrong").await.unwrap().is_none());
        assert!(accounts.authenticate("nobody@example.com", "s3cret").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let accounts = accounts().await;
        accounts.create_user("ana@example.com", "pw", None).await.unwrap();
        assert!(matches!(
            accounts.create_user("ANA@example.com", "pw", None).await,
            Err(AccountError::DuplicateUser(_))
        ));
    }

    #[tokio::test]
    async fn creator_administers_new_team() {
        let accounts = accounts().await;
        let ana = accounts.create_user("ana@example.com", "pw", None).await.unwrap();
        let team = accounts.create_team(&ana, "Legal", Some("contracts")).await.unwrap();

        assert_eq!(team.created_by, Some(ana.id));
        assert_eq!(accounts.teams_for(&ana).await.unwrap(), vec![team.clone()]);
        assert!(matches!(
            accounts.create_team(&ana, " Legal ", None).await,
            Err(AccountError::DuplicateTeam(_))
        ));
    }

    #[tokio::test]
    async fn only_admins_add_members() {
        let accounts = accounts().await;
        let ana = accounts.create_user("ana@example.com", "pw", None).await.unwrap();
        let bo = accounts.create_user("bo@example.com", "pw", None).await.unwrap();
        accounts.create_user("cy@example.com", "pw", None).await.unwrap();
        let team = accounts.create_team(&ana, "Legal", None).await.unwrap();

        let admin = RequestContext::new(team.id, ana.id);
        let member = accounts
            .add_member(&admin, "bo@example.com", TeamRole::Staff)
            .await
            .unwrap();
        assert_eq!(member.user_id, bo.id);
        assert_eq!(member.role, TeamRole::Staff);

        assert!(matches!(
            accounts.add_member(&admin, "bo@example.com", TeamRole::Guest).await,
            Err(AccountError::DuplicateMember(_))
        ));
        assert!(matches!(
            accounts.add_member(&admin, "zed@example.com", TeamRole::Guest).await,
            Err(AccountError::UnknownUser(_))
        ));

        let staff = RequestContext::new(team.id, bo.id);
        assert!(matches!(
            accounts.add_member(&staff, "cy@example.com", TeamRole::Guest).await,
            Err(AccountError::NotAdmin)
        ));
    }
}
