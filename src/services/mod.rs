//! Business logic services

pub mod auth;
pub mod books;
pub mod email;
pub mod password;
pub mod storage;
pub mod tokens;
pub mod users;

use crate::{config::AppConfig, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub auth: auth::AuthService,
    pub tokens: tokens::TokenService,
    pub password: password::PasswordService,
    pub users: users::UsersService,
    pub books: books::BooksService,
    pub repository: Repository,
}

impl Services {
    /// Create all services with the given repository and mailer
    pub fn new(repository: Repository, config: &AppConfig, email: email::EmailService) -> Self {
        let expose_tokens = !config.is_production();
        let storage = storage::FileStorage::new(&config.uploads.dir);
        let tokens = tokens::TokenService::new(repository.clone(), config.auth.clone());

        Self {
            auth: auth::AuthService::new(
                repository.clone(),
                tokens.clone(),
                email.clone(),
                config.auth.clone(),
                expose_tokens,
            ),
            password: password::PasswordService::new(
                repository.clone(),
                tokens.clone(),
                email,
                config.auth.clone(),
                expose_tokens,
            ),
            users: users::UsersService::new(repository.clone(), tokens.clone(), storage.clone()),
            books: books::BooksService::new(repository.clone(), storage),
            tokens,
            repository,
        }
    }
}
