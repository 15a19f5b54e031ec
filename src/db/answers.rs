use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{Answer, DbAnswer};
use crate::pagination::{Page, PageWindow};

const ANSWER_SELECT: &str = "SELECT a.id, a.question_id, a.body, a.author_id,
        CASE WHEN u.display_name = '' THEN u.username ELSE u.display_name END AS author_name,
        a.created_at,
        COALESCE((SELECT SUM(v.value) FROM answer_votes v WHERE v.answer_id = a.id), 0) AS score,
        CASE WHEN q.correct_answer_id = a.id THEN 1 ELSE 0 END AS is_correct
    FROM answers a
    JOIN users u ON u.id = a.author_id
    JOIN questions q ON q.id = a.question_id";

#[instrument(skip(pool, body))]
pub async fn create_answer(
    pool: &Pool<Sqlite>,
    question_id: i64,
    author_id: i64,
    body: &str,
) -> Result<i64, AppError> {
    info!("Creating answer");

    let question_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM questions WHERE id = ?")
        .bind(question_id)
        .fetch_optional(pool)
        .await?;

    if question_exists.is_none() {
        return Err(AppError::NotFound(format!(
            "Question with id {} not found",
            question_id
        )));
    }

    let now = Utc::now().naive_utc();
    let res = sqlx::query(
        "INSERT INTO answers (question_id, body, author_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(question_id)
    .bind(body)
    .bind(author_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn get_answer(pool: &Pool<Sqlite>, id: i64) -> Result<Answer, AppError> {
    info!("Getting answer");
    let row = sqlx::query_as::<_, DbAnswer>(&format!("{} WHERE a.id = ?", ANSWER_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    match row {
        Some(answer) => Ok(Answer::from(answer)),
        _ => Err(AppError::NotFound(format!("Answer with id {} not found", id))),
    }
}

/// Answers to one question, best score first and oldest first among ties.
#[instrument]
pub async fn list_answers(
    pool: &Pool<Sqlite>,
    question_id: i64,
    page: Option<i64>,
    per_page: i64,
) -> Result<Page<Answer>, AppError> {
    info!("Listing answers");

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE question_id = ?")
        .bind(question_id)
        .fetch_one(pool)
        .await?;

    let window = PageWindow::resolve(page, per_page, total);

    let rows = sqlx::query_as::<_, DbAnswer>(&format!(
        "{} WHERE a.question_id = ?
         ORDER BY score DESC, a.created_at ASC, a.id ASC
         LIMIT ? OFFSET ?",
        ANSWER_SELECT
    ))
    .bind(question_id)
    .bind(window.limit())
    .bind(window.offset())
    .fetch_all(pool)
    .await?;

    Ok(window.into_page(rows.into_iter().map(Answer::from).collect()))
}
