use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use vidtube_db::Database;
use vidtube_types::api::{LoginRequest, RegisterRequest};
use vidtube_types::models::User;

use crate::error::{CoreError, CoreResult};
use crate::run_blocking;

fn require(field: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{} is required", field)));
    }
    Ok(())
}

fn validate_username(username: &str) -> CoreResult<()> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(CoreError::Validation("username must be 3 to 32 characters".into()));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return Err(CoreError::Validation(
            "username may only contain letters, digits, '_' and '.'".into(),
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> CoreResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(CoreError::Validation("email is malformed".into())),
    }
}

fn validate_password(password: &str) -> CoreResult<()> {
    if password.len() < 8 {
        return Err(CoreError::Validation("password must be at least 8 characters".into()));
    }
    Ok(())
}

/// Maps a unique-index rejection from the store to a conflict.
fn on_unique(err: CoreError, what: &'static str) -> CoreError {
    match err {
        CoreError::Persistence(e) if vidtube_db::is_constraint_violation(&e) => CoreError::Conflict(what),
        other => other,
    }
}

/// Argon2id with a random salt. CPU-bound, so it runs on the blocking pool.
async fn hash_password(password: String) -> CoreResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        CoreError::Hashing
    })?
    .map_err(|_| CoreError::Hashing)
}

async fn verify_password(password: String, hash: String) -> CoreResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|_| CoreError::Hashing)?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        CoreError::Hashing
    })?
}

/// Registration, login and profile changes.
#[derive(Clone)]
pub struct Accounts {
    db: Arc<Database>,
}

impl Accounts {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn register(&self, req: RegisterRequest) -> CoreResult<User> {
        require("fullName", &req.full_name)?;
        require("email", &req.email)?;
        require("username", &req.username)?;
        require("password", &req.password)?;
        require("avatar", &req.avatar)?;

        let username = req.username.trim().to_lowercase();
        let email = req.email.trim().to_lowercase();
        validate_username(&username)?;
        validate_email(&email)?;
        validate_password(&req.password)?;

        let (u, e) = (username.clone(), email.clone());
        let existing = run_blocking(&self.db, move |db| {
            db.find_user_by_username_or_email(Some(&u), Some(&e))
        })
        .await?;
        if existing.is_some() {
            return Err(CoreError::Conflict("user with this username or email"));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username,
            email,
            full_name: req.full_name.trim().to_string(),
            avatar: req.avatar,
            cover_image: req.cover_image.unwrap_or_default(),
            password: hash_password(req.password).await?,
            refresh_token: None,
            watch_history: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        // A concurrent registration can still win the unique index.
        let doc = user.clone();
        run_blocking(&self.db, move |db| db.create_user(&doc))
            .await
            .map_err(|e| on_unique(e, "user with this username or email"))?;

        info!(user_id = %user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    /// Looks the user up by username or email and checks the password.
    pub async fn authenticate(&self, req: LoginRequest) -> CoreResult<User> {
        let username = req.username.filter(|s| !s.trim().is_empty());
        let email = req.email.filter(|s| !s.trim().is_empty());
        if username.is_none() && email.is_none() {
            return Err(CoreError::Validation("username or email is required".into()));
        }

        let user = run_blocking(&self.db, move |db| {
            db.find_user_by_username_or_email(username.as_deref(), email.as_deref())
        })
        .await?
        .ok_or(CoreError::NotFound("user"))?;

        if !verify_password(req.password, user.password.clone()).await? {
            return Err(CoreError::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn get(&self, user_id: Uuid) -> CoreResult<User> {
        run_blocking(&self.db, move |db| db.get_user_by_id(user_id))
            .await?
            .ok_or(CoreError::NotFound("user"))
    }

    /// The new password is hashed before it is stored.
    pub async fn change_password(&self, user_id: Uuid, old_password: String, new_password: String) -> CoreResult<()> {
        let user = self.get(user_id).await?;
        if !verify_password(old_password, user.password).await? {
            return Err(CoreError::Validation("old password is incorrect".into()));
        }
        validate_password(&new_password)?;

        let hash = hash_password(new_password).await?;
        let updated = run_blocking(&self.db, move |db| db.update_password(user_id, &hash)).await?;
        if !updated {
            return Err(CoreError::NotFound("user"));
        }

        info!(user_id = %user_id, "Password changed");
        Ok(())
    }

    pub async fn update_account(&self, user_id: Uuid, full_name: String, email: String) -> CoreResult<User> {
        require("fullName", &full_name)?;
        require("email", &email)?;
        let email = email.trim().to_lowercase();
        validate_email(&email)?;

        let e = email.clone();
        let owner = run_blocking(&self.db, move |db| db.find_user_by_username_or_email(None, Some(&e))).await?;
        if owner.is_some_and(|u| u.id != user_id) {
            return Err(CoreError::Conflict("user with this email"));
        }

        let name = full_name.trim().to_string();
        let updated = run_blocking(&self.db, move |db| db.update_account(user_id, &name, &email))
            .await
            .map_err(|e| on_unique(e, "user with this email"))?;
        if !updated {
            return Err(CoreError::NotFound("user"));
        }
        self.get(user_id).await
    }
}
