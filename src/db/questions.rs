use chrono::Utc;
use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::{get_tags_for_questions, resolve_tags};
use crate::error::AppError;
use crate::models::{DbQuestion, Question, QuestionSort};
use crate::pagination::{Page, PageWindow};
use crate::search::QuestionFilter;

const QUESTION_SELECT: &str = "SELECT q.id, q.title, q.body, q.author_id,
        CASE WHEN u.display_name = '' THEN u.username ELSE u.display_name END AS author_name,
        q.created_at,
        COALESCE((SELECT SUM(v.value) FROM question_votes v WHERE v.question_id = q.id), 0) AS score,
        (SELECT COUNT(*) FROM answers a WHERE a.question_id = q.id) AS answer_count,
        q.correct_answer_id
    FROM questions q
    JOIN users u ON u.id = q.author_id";

fn push_filter<'args>(builder: &mut QueryBuilder<'args, Sqlite>, filter: &QuestionFilter) {
    match filter {
        QuestionFilter::All => {}
        QuestionFilter::Text(phrase) => {
            let pattern = format!("%{}%", escape_like(phrase));
            builder.push(" WHERE (q.title LIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" ESCAPE '\\' OR q.body LIKE ");
            builder.push_bind(pattern);
            builder.push(" ESCAPE '\\')");
        }
        QuestionFilter::Tag(name) => {
            builder.push(
                " WHERE EXISTS (SELECT 1 FROM question_tags qt
                    JOIN tags t ON t.id = qt.tag_id
                    WHERE qt.question_id = q.id AND t.name = ",
            );
            builder.push_bind(name.clone());
            builder.push(" COLLATE NOCASE)");
        }
    }
}

fn escape_like(phrase: &str) -> String {
    let mut escaped = String::with_capacity(phrase.len());
    for c in phrase.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

async fn attach_tags(
    pool: &Pool<Sqlite>,
    rows: Vec<DbQuestion>,
) -> Result<Vec<Question>, AppError> {
    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    let mut tags = get_tags_for_questions(pool, &ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            let question_tags = tags.remove(&row.id).unwrap_or_default();
            row.with_tags(question_tags)
        })
        .collect())
}

#[instrument(skip(pool, body))]
pub async fn create_question(
    pool: &Pool<Sqlite>,
    author_id: i64,
    title: &str,
    body: &str,
    tag_names: &[String],
) -> Result<i64, AppError> {
    info!("Creating question");
    let mut tx = pool.begin().await?;

    let tags = resolve_tags(&mut *tx, tag_names).await?;

    let now = Utc::now().naive_utc();
    let res = sqlx::query(
        "INSERT INTO questions (title, body, author_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(title)
    .bind(body)
    .bind(author_id)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    let question_id = res.last_insert_rowid();

    for tag in &tags {
        sqlx::query("INSERT INTO question_tags (question_id, tag_id) VALUES (?, ?)")
            .bind(question_id)
            .bind(tag.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(question_id)
}

#[instrument]
pub async fn get_question(pool: &Pool<Sqlite>, id: i64) -> Result<Question, AppError> {
    info!("Getting question");
    let row = sqlx::query_as::<_, DbQuestion>(&format!("{} WHERE q.id = ?", QUESTION_SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Question with id {} not found", id)))?;

    let mut questions = attach_tags(pool, vec![row]).await?;
    questions
        .pop()
        .ok_or_else(|| AppError::Internal("Question vanished while loading tags".to_string()))
}

#[instrument]
pub async fn list_questions(
    pool: &Pool<Sqlite>,
    filter: &QuestionFilter,
    sort: QuestionSort,
    page: Option<i64>,
    per_page: i64,
) -> Result<Page<Question>, AppError> {
    info!("Listing questions");

    let mut count_query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM questions q");
    push_filter(&mut count_query, filter);
    let total = count_query
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await?;

    let window = PageWindow::resolve(page, per_page, total);

    let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(QUESTION_SELECT);
    push_filter(&mut select, filter);
    select.push(" ORDER BY ");
    select.push(sort.order_by());
    select.push(" LIMIT ");
    select.push_bind(window.limit());
    select.push(" OFFSET ");
    select.push_bind(window.offset());

    let rows = select
        .build_query_as::<DbQuestion>()
        .fetch_all(pool)
        .await?;

    let questions = attach_tags(pool, rows).await?;
    Ok(window.into_page(questions))
}

#[instrument]
pub async fn trending_questions(
    pool: &Pool<Sqlite>,
    limit: i64,
) -> Result<Vec<Question>, AppError> {
    info!("Getting trending questions");
    let rows = sqlx::query_as::<_, DbQuestion>(&format!(
        "{} ORDER BY {} LIMIT ?",
        QUESTION_SELECT,
        QuestionSort::Hot.order_by()
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    attach_tags(pool, rows).await
}

/// Removes the question; answers, tag links and votes go with it.
#[instrument]
pub async fn delete_question(pool: &Pool<Sqlite>, id: i64) -> Result<(), AppError> {
    info!("Deleting question");
    let res = sqlx::query("DELETE FROM questions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Question with id {} not found", id)));
    }

    Ok(())
}

/// Marks `answer_id` as the question's correct answer, or clears the mark
/// when it is already the correct one. Returns the resulting correct answer.
#[instrument]
pub async fn toggle_correct_answer(
    pool: &Pool<Sqlite>,
    question_id: i64,
    answer_id: i64,
) -> Result<Option<i64>, AppError> {
    info!("Toggling correct answer");
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let owner: Option<i64> = sqlx::query_scalar("SELECT question_id FROM answers WHERE id = ?")
        .bind(answer_id)
        .fetch_optional(&mut *tx)
        .await?;

    match owner {
        None => {
            return Err(AppError::NotFound(format!(
                "Answer with id {} not found",
                answer_id
            )));
        }
        Some(owner) if owner != question_id => {
            return Err(AppError::Validation(format!(
                "Answer {} does not belong to question {}",
                answer_id, question_id
            )));
        }
        Some(_) => {}
    }

    let current: Option<Option<i64>> =
        sqlx::query_scalar("SELECT correct_answer_id FROM questions WHERE id = ?")
            .bind(question_id)
            .fetch_optional(&mut *tx)
            .await?;

    let current = current.ok_or_else(|| {
        AppError::NotFound(format!("Question with id {} not found", question_id))
    })?;

    let next = if current == Some(answer_id) {
        None
    } else {
        Some(answer_id)
    };

    sqlx::query("UPDATE questions SET correct_answer_id = ? WHERE id = ?")
        .bind(next)
        .bind(question_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(next)
}
