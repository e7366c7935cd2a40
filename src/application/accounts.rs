use tracing::{info, instrument, warn};

use crate::domain::{NewUser, User};

use super::password::{hash_password, verify_dummy, verify_password};
use super::{AccountLedger, LedgerError};

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 32;
const MIN_PASSWORD_LEN: usize = 8;

impl AccountLedger {
    /// Register a new user with a zero balance in the default currency.
    #[instrument(skip(self, password))]
    pub async fn register_user(&self, username: &str, password: &str) -> Result<User, LedgerError> {
        let username = username.trim();
        validate_username(username)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(LedgerError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| LedgerError::Credential(e.to_string()))?
            .map_err(|e| LedgerError::Credential(e.to_string()))?;

        let user = self
            .store()
            .create_user(NewUser {
                username: username.to_string(),
                password_hash,
                currency: self.settings().default_currency.clone(),
            })
            .await?;

        info!(user_id = user.id, "user registered");
        Ok(user)
    }

    /// Resolve a username/password pair to a user.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, LedgerError> {
        let password = password.to_string();
        let Some(user) = self.store().get_user_by_username(username.trim()).await? else {
            // Unknown users cost one Argon2 verification, like a wrong password.
            tokio::task::spawn_blocking(move || verify_dummy(&password))
                .await
                .map_err(|e| LedgerError::Credential(e.to_string()))?;
            return Err(LedgerError::Unauthorized);
        };

        let hash = user.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| LedgerError::Credential(e.to_string()))?
            .map_err(|e| LedgerError::Credential(e.to_string()))?;

        if !matches {
            warn!(user_id = user.id, "failed login");
            return Err(LedgerError::Unauthorized);
        }
        Ok(user)
    }

    /// Look a user up by name.
    pub async fn find_user(&self, username: &str) -> Result<User, LedgerError> {
        self.store()
            .get_user_by_username(username.trim())
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("user '{}'", username)))
    }
}

fn validate_username(username: &str) -> Result<(), LedgerError> {
    if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
        return Err(LedgerError::Validation(format!(
            "Username must be {} to {} characters",
            MIN_USERNAME_LEN, MAX_USERNAME_LEN
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(LedgerError::Validation(
            "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
        ));
    }
    Ok(())
}
