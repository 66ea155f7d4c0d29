//! User profile and directory service

use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::{
        pagination::{Paginated, Pagination},
        user::{normalize_email, UpdateProfile, User, UserQuery, UserSummary},
    },
    repository::Repository,
    services::{
        auth::hash_password,
        storage::{FileStorage, UploadedFile},
        tokens::TokenService,
    },
};

#[derive(Clone)]
pub struct UsersService {
    repository: Repository,
    tokens: TokenService,
    storage: FileStorage,
}

impl UsersService {
    pub fn new(repository: Repository, tokens: TokenService, storage: FileStorage) -> Self {
        Self {
            repository,
            tokens,
            storage,
        }
    }

    /// Get user by ID
    pub async fn get_by_id(&self, id: i32) -> AppResult<User> {
        self.repository.users_get_by_id(id).await
    }

    /// Search users
    pub async fn search_users(&self, query: &UserQuery) -> AppResult<Paginated<UserSummary>> {
        let window = Pagination::new(query.page, query.limit);
        let (users, total) = self.repository.users_search(query, window).await?;
        Ok(Paginated::new(users, total, window))
    }

    /// Update own profile (name, email, password)
    pub async fn update_profile(&self, user_id: i32, mut profile: UpdateProfile) -> AppResult<User> {
        profile.name = profile.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        profile.email = profile.email.map(|e| normalize_email(&e)).filter(|e| !e.is_empty());
        profile.password = profile.password.filter(|p| !p.is_empty());
        profile.validate()?;

        if profile.is_empty() {
            return Err(AppError::BadRequest("Nothing to update".to_string()));
        }

        if let Some(ref email) = profile.email {
            if self.repository.users_email_exists(email, Some(user_id)).await? {
                return Err(AppError::Conflict("Email already exists".to_string()));
            }
        }

        let password_hash = profile.password.as_deref().map(hash_password).transpose()?;

        let user = self
            .repository
            .users_update_profile(
                user_id,
                profile.name.as_deref(),
                profile.email.as_deref(),
                password_hash.as_deref(),
            )
            .await?;

        // A changed password ends every other session
        if password_hash.is_some() {
            self.tokens.revoke_all_refresh_tokens(user_id).await?;
        }

        Ok(user)
    }

    /// Store a new avatar, deleting the previous file
    pub async fn set_avatar(&self, user_id: i32, upload: &UploadedFile) -> AppResult<User> {
        let previous = self.repository.users_get_by_id(user_id).await?.avatar;

        let path = self.storage.save(upload).await?;
        let user = match self.repository.users_set_avatar(user_id, Some(&path)).await {
            Ok(user) => user,
            Err(e) => {
                self.storage.remove(&path).await;
                return Err(e);
            }
        };

        if let Some(old) = previous {
            self.storage.remove(&old).await;
        }
        Ok(user)
    }

    /// Remove the avatar and its file
    pub async fn clear_avatar(&self, user_id: i32) -> AppResult<User> {
        let previous = self.repository.users_get_by_id(user_id).await?.avatar;
        let user = self.repository.users_set_avatar(user_id, None).await?;
        if let Some(old) = previous {
            self.storage.remove(&old).await;
        }
        Ok(user)
    }
}
