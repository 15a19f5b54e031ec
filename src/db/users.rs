use chrono::Utc;
use serde::Serialize;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::auth::{DbUser, Role, User};
use crate::error::AppError;

#[cfg(not(test))]
const PASSWORD_HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const PASSWORD_HASH_COST: u32 = 4;

const USER_COLUMNS: &str = "id, username, email, role, display_name, avatar_url, created_at";

/// Public view of a user with activity counts.
#[derive(Debug, Serialize, Clone)]
pub struct UserProfile {
    pub user: User,
    pub question_count: i64,
    pub answer_count: i64,
}

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Finding user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE username = ?",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(username, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    email: &str,
    password: &str,
    role: &Role,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    if find_user_by_username(pool, username).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, PASSWORD_HASH_COST)?;
    let now = Utc::now().naive_utc();

    let res = sqlx::query(
        "INSERT INTO users (username, email, password, role, display_name, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(username)
    .bind(email)
    .bind(hashed_password)
    .bind(role.as_str())
    .bind(display_name.unwrap_or_default())
    .bind(now)
    .execute(pool)
    .await
    .map_err(|err| {
        if super::is_unique_violation(&err) {
            AppError::Conflict(format!("Username '{}' already exists", username))
        } else {
            AppError::Database(err)
        }
    })?;

    Ok(res.last_insert_rowid())
}

/// Returns the user when the password matches its stored hash.
#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");

    #[derive(sqlx::FromRow)]
    struct Credentials {
        id: i64,
        password: String,
    }

    let credentials =
        sqlx::query_as::<_, Credentials>("SELECT id, password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    let Some(credentials) = credentials else {
        return Ok(None);
    };

    match bcrypt::verify(password, &credentials.password) {
        Ok(true) => Ok(Some(get_user(pool, credentials.id).await?)),
        _ => Ok(None),
    }
}

#[instrument(skip_all, fields(user_id))]
pub async fn update_user_password(
    pool: &Pool<Sqlite>,
    user_id: i64,
    new_password: &str,
) -> Result<(), AppError> {
    info!("Updating user password");
    let hashed_password = bcrypt::hash(new_password, PASSWORD_HASH_COST)?;

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed_password)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument]
pub async fn update_user_profile(
    pool: &Pool<Sqlite>,
    user_id: i64,
    display_name: &str,
    email: &str,
    avatar_url: Option<&str>,
) -> Result<(), AppError> {
    info!("Updating user profile");
    let res = sqlx::query(
        "UPDATE users SET display_name = ?, email = ?, avatar_url = ? WHERE id = ?",
    )
    .bind(display_name)
    .bind(email)
    .bind(avatar_url)
    .bind(user_id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("User with id {} not found", user_id)));
    }

    Ok(())
}

#[instrument]
pub async fn get_user_profile(pool: &Pool<Sqlite>, username: &str) -> Result<UserProfile, AppError> {
    info!("Getting user profile");
    let user = find_user_by_username(pool, username)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", username)))?;

    let (question_count, answer_count): (i64, i64) = sqlx::query_as(
        "SELECT
            (SELECT COUNT(*) FROM questions WHERE author_id = ?),
            (SELECT COUNT(*) FROM answers WHERE author_id = ?)",
    )
    .bind(user.id)
    .bind(user.id)
    .fetch_one(pool)
    .await?;

    Ok(UserProfile {
        user,
        question_count,
        answer_count,
    })
}
