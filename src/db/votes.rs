use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::VoteDirection;

/// A question or answer that users can vote on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteTarget {
    Question(i64),
    Answer(i64),
}

impl VoteTarget {
    pub fn id(self) -> i64 {
        match self {
            VoteTarget::Question(id) | VoteTarget::Answer(id) => id,
        }
    }

    fn item_table(self) -> &'static str {
        match self {
            VoteTarget::Question(_) => "questions",
            VoteTarget::Answer(_) => "answers",
        }
    }

    fn vote_table(self) -> &'static str {
        match self {
            VoteTarget::Question(_) => "question_votes",
            VoteTarget::Answer(_) => "answer_votes",
        }
    }

    fn target_column(self) -> &'static str {
        match self {
            VoteTarget::Question(_) => "question_id",
            VoteTarget::Answer(_) => "answer_id",
        }
    }
}

impl fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteTarget::Question(id) => write!(f, "question {}", id),
            VoteTarget::Answer(id) => write!(f, "answer {}", id),
        }
    }
}

/// State of one (user, item) pair after a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub vote: Option<VoteDirection>,
    pub score: i64,
}

/// Pressing the same direction again retracts the vote; any other press
/// lands on the requested direction.
pub fn next_vote(current: Option<VoteDirection>, requested: VoteDirection) -> Option<VoteDirection> {
    match current {
        Some(existing) if existing == requested => None,
        _ => Some(requested),
    }
}

async fn current_vote(
    conn: &mut SqliteConnection,
    user_id: i64,
    target: VoteTarget,
) -> Result<Option<VoteDirection>, AppError> {
    let value: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT value FROM {} WHERE user_id = ? AND {} = ?",
        target.vote_table(),
        target.target_column()
    ))
    .bind(user_id)
    .bind(target.id())
    .fetch_optional(&mut *conn)
    .await?;

    value.map(VoteDirection::try_from).transpose()
}

async fn score_of(conn: &mut SqliteConnection, target: VoteTarget) -> Result<i64, AppError> {
    let score: i64 = sqlx::query_scalar(&format!(
        "SELECT COALESCE(SUM(value), 0) FROM {} WHERE {} = ?",
        target.vote_table(),
        target.target_column()
    ))
    .bind(target.id())
    .fetch_one(&mut *conn)
    .await?;

    Ok(score)
}

/// Applies a like/dislike press by `user_id` on `target`.
///
/// The stored vote moves through {none, +1, -1}: the same direction twice
/// returns to none, the opposite direction replaces the existing row. The
/// read, delete and insert run in one `BEGIN IMMEDIATE` transaction, so a
/// concurrent press waits on the write lock and then sees this one's result.
#[instrument(skip(pool))]
pub async fn toggle_vote(
    pool: &Pool<Sqlite>,
    user_id: i64,
    target: VoteTarget,
    direction: VoteDirection,
) -> Result<VoteOutcome, AppError> {
    info!("Toggling vote");
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let exists: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT id FROM {} WHERE id = ?",
        target.item_table()
    ))
    .bind(target.id())
    .fetch_optional(&mut *tx)
    .await?;

    if exists.is_none() {
        return Err(AppError::NotFound(format!("Cannot vote on missing {}", target)));
    }

    let current = current_vote(&mut *tx, user_id, target).await?;
    let next = next_vote(current, direction);

    if current.is_some() {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE user_id = ? AND {} = ?",
            target.vote_table(),
            target.target_column()
        ))
        .bind(user_id)
        .bind(target.id())
        .execute(&mut *tx)
        .await?;
    }

    if let Some(vote) = next {
        sqlx::query(&format!(
            "INSERT INTO {} (user_id, {}, value) VALUES (?, ?, ?)",
            target.vote_table(),
            target.target_column()
        ))
        .bind(user_id)
        .bind(target.id())
        .bind(vote.value())
        .execute(&mut *tx)
        .await?;
    }

    let score = score_of(&mut *tx, target).await?;
    tx.commit().await?;

    info!(from = ?current, to = ?next, score, "Vote toggled");
    Ok(VoteOutcome { vote: next, score })
}

#[instrument(skip(pool))]
pub async fn get_user_vote(
    pool: &Pool<Sqlite>,
    user_id: i64,
    target: VoteTarget,
) -> Result<Option<VoteDirection>, AppError> {
    let mut conn = pool.acquire().await?;
    current_vote(&mut *conn, user_id, target).await
}

#[cfg(test)]
#[instrument(skip(pool))]
pub async fn get_score(pool: &Pool<Sqlite>, target: VoteTarget) -> Result<i64, AppError> {
    let mut conn = pool.acquire().await?;
    score_of(&mut *conn, target).await
}

/// The viewer's own votes on a page of answers, keyed by answer id.
#[instrument(skip(pool))]
pub async fn get_user_answer_votes(
    pool: &Pool<Sqlite>,
    user_id: i64,
    answer_ids: &[i64],
) -> Result<HashMap<i64, VoteDirection>, AppError> {
    let mut votes = HashMap::new();
    if answer_ids.is_empty() {
        return Ok(votes);
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("SELECT answer_id, value FROM answer_votes WHERE user_id = ");
    builder.push_bind(user_id);
    builder.push(" AND answer_id IN (");
    let mut separated = builder.separated(", ");
    for id in answer_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");

    let rows: Vec<(i64, i64)> = builder.build_query_as::<(i64, i64)>().fetch_all(pool).await?;
    for (answer_id, value) in rows {
        votes.insert(answer_id, VoteDirection::try_from(value)?);
    }

    Ok(votes)
}
