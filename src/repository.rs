//! User and backend-server records, and the queries that load and store them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::Database;
use crate::error::Result;
use crate::executor::QueryOutcome;
use crate::params;
use crate::types::{value_at_first_row, ResultSet};

const SELECT_USER_BY_ID: &str = "SELECT * FROM users WHERE id = $1";
const SELECT_USER_BY_TOKEN: &str = "SELECT * FROM users WHERE token = $1";
const SELECT_USER_BY_LOGIN: &str = "SELECT * FROM users WHERE login = $1";
const SELECT_USER_BY_EMAIL: &str = "SELECT * FROM users WHERE email = $1";
const SELECT_BACKEND_BY_ID: &str = "SELECT * FROM backend WHERE id = $1";
const UPDATE_USER: &str = "UPDATE users \
     SET login = $1, email = $2, password = $3, \"backendId\" = $4, token = $5, \"tokenExp\" = $6, status = $7 \
     WHERE id = $8";
const INSERT_USER: &str = "INSERT INTO users (login, email, password, \"backendId\", token, \"tokenExp\", status) \
     VALUES ($1, $2, $3, $4, $5, $6, $7)";

/// A backend server a user is assigned to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub id: u64,
    pub address: String,
    pub region: String,
}

/// A row of the `users` table, with its backend resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub login: String,
    pub email: String,
    pub password: String,
    pub backend_id: Backend,
    pub token: String,
    pub token_exp: u64,
    pub status: u64,
}

/// Typed user and backend operations.
///
/// Lookups return the default (all zero, empty strings) record when the
/// query fails or matches nothing.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_user_by_id(&self, id: &str) -> Result<User>;
    async fn get_user_by_token(&self, token: &str) -> Result<User>;
    async fn get_user_by_login(&self, login: &str) -> Result<User>;
    async fn get_user_by_email(&self, email: &str) -> Result<User>;
    async fn update_user(&self, user: &User) -> QueryOutcome;
    async fn add_user(&self, user: &User) -> QueryOutcome;
    async fn get_backend_server_by_id(&self, id: u64) -> Result<Backend>;
}

impl Database {
    async fn find_user(&self, sql: &str, key: &str) -> Result<User> {
        match self.query(sql, &params![key]).await {
            Some(answer) => self.user_from_row(&answer).await,
            None => Ok(User::default()),
        }
    }

    async fn user_from_row(&self, answer: &ResultSet) -> Result<User> {
        let answer = Some(answer);
        let backend_id: u64 = value_at_first_row(answer, "\"backendId\"")?;
        Ok(User {
            id: value_at_first_row(answer, "id")?,
            login: value_at_first_row(answer, "login")?,
            email: value_at_first_row(answer, "email")?,
            password: value_at_first_row(answer, "password")?,
            backend_id: self.get_backend_server_by_id(backend_id).await?,
            token: value_at_first_row(answer, "token")?,
            token_exp: value_at_first_row(answer, "\"tokenExp\"")?,
            status: value_at_first_row(answer, "status")?,
        })
    }
}

#[async_trait]
impl UserRepository for Database {
    async fn get_user_by_id(&self, id: &str) -> Result<User> {
        self.find_user(SELECT_USER_BY_ID, id).await
    }

    async fn get_user_by_token(&self, token: &str) -> Result<User> {
        self.find_user(SELECT_USER_BY_TOKEN, token).await
    }

    async fn get_user_by_login(&self, login: &str) -> Result<User> {
        self.find_user(SELECT_USER_BY_LOGIN, login).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<User> {
        self.find_user(SELECT_USER_BY_EMAIL, email).await
    }

    async fn update_user(&self, user: &User) -> QueryOutcome {
        let outcome = self
            .execute(
                UPDATE_USER,
                &params![
                    &user.login,
                    &user.email,
                    &user.password,
                    user.backend_id.id,
                    &user.token,
                    user.token_exp,
                    user.status,
                    user.id,
                ],
            )
            .await;
        if outcome.is_available() {
            tracing::info!(user_id = user.id, "update user OK");
        } else {
            tracing::warn!(user_id = user.id, "update user FAIL");
        }
        outcome
    }

    async fn add_user(&self, user: &User) -> QueryOutcome {
        let outcome = self
            .execute(
                INSERT_USER,
                &params![
                    &user.login,
                    &user.email,
                    &user.password,
                    user.backend_id.id,
                    &user.token,
                    user.token_exp,
                    user.status,
                ],
            )
            .await;
        if outcome.is_available() {
            tracing::info!(login = %user.login, "add user OK");
        } else {
            tracing::warn!(login = %user.login, "add user FAIL");
        }
        outcome
    }

    async fn get_backend_server_by_id(&self, id: u64) -> Result<Backend> {
        let answer = self.query(SELECT_BACKEND_BY_ID, &params![id]).await;
        let Some(answer) = answer else {
            return Ok(Backend::default());
        };
        let answer = Some(&answer);
        Ok(Backend {
            id: value_at_first_row(answer, "id")?,
            address: value_at_first_row(answer, "address")?,
            region: value_at_first_row(answer, "region")?,
        })
    }
}
