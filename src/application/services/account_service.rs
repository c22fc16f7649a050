//! Account registration.

use serde_json::json;
use std::sync::Arc;

use crate::domain::entities::{NewUser, User};
use crate::domain::repositories::AccountRepository;
use crate::error::AppError;

/// Registers users; each registration enqueues a `create-subscription` fact.
pub struct AccountService<A: AccountRepository> {
    account_repository: Arc<A>,
}

impl<A: AccountRepository> AccountService<A> {
    pub fn new(account_repository: Arc<A>) -> Self {
        Self { account_repository }
    }

    /// Creates a user and its outbox row in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Validation`] for a malformed email and
    /// [`AppError::Conflict`] if the email is taken.
    pub async fn register(&self, email: &str, password_hash: &str) -> Result<User, AppError> {
        let new_user = NewUser::new(email, password_hash);
        if !new_user.has_valid_email() {
            return Err(AppError::bad_request(
                "Invalid email address",
                json!({ "email": new_user.email }),
            ));
        }

        if self
            .account_repository
            .find_by_email(&new_user.email)
            .await?
            .is_some()
        {
            return Err(AppError::conflict(
                "Email already registered",
                json!({ "email": new_user.email }),
            ));
        }

        let user = self.account_repository.register(new_user).await?;
        tracing::info!(user_id = user.id, "user registered");
        Ok(user)
    }
}
