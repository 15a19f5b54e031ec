use std::collections::HashMap;

use sqlx::{Pool, QueryBuilder, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{Tag, TagWithCount};

pub const DUPLICATE_TAG_MESSAGE: &str = "Tag already exists (case insensitive match)";

#[instrument]
pub async fn create_tag(pool: &Pool<Sqlite>, name: &str) -> Result<i64, AppError> {
    info!("Creating tag");
    let name = name.trim();

    if name.is_empty() {
        return Err(AppError::Validation("Tag name cannot be empty".to_string()));
    }

    if find_tag_by_name(pool, name).await?.is_some() {
        return Err(AppError::Validation(DUPLICATE_TAG_MESSAGE.to_string()));
    }

    let res = sqlx::query("INSERT INTO tags (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .map_err(|err| {
            if super::is_unique_violation(&err) {
                AppError::Validation(DUPLICATE_TAG_MESSAGE.to_string())
            } else {
                AppError::Database(err)
            }
        })?;

    Ok(res.last_insert_rowid())
}

#[instrument]
pub async fn find_tag_by_name(pool: &Pool<Sqlite>, name: &str) -> Result<Option<Tag>, AppError> {
    let tag = sqlx::query_as::<_, Tag>("SELECT id, name FROM tags WHERE name = ? COLLATE NOCASE")
        .bind(name.trim())
        .fetch_optional(pool)
        .await?;

    Ok(tag)
}

#[instrument]
pub async fn get_all_tags(pool: &Pool<Sqlite>) -> Result<Vec<TagWithCount>, AppError> {
    info!("Getting all tags");
    let tags = sqlx::query_as::<_, TagWithCount>(
        "SELECT t.id, t.name, COUNT(qt.question_id) AS question_count
         FROM tags t
         LEFT JOIN question_tags qt ON qt.tag_id = t.id
         GROUP BY t.id, t.name
         ORDER BY t.name COLLATE NOCASE",
    )
    .fetch_all(pool)
    .await?;

    Ok(tags)
}

/// Looks up every label case-insensitively, collapsing duplicates.
/// An unknown label is a validation error naming it.
pub(crate) async fn resolve_tags(
    conn: &mut SqliteConnection,
    names: &[String],
) -> Result<Vec<Tag>, AppError> {
    let mut tags: Vec<Tag> = Vec::with_capacity(names.len());

    for name in names {
        let tag = sqlx::query_as::<_, Tag>("SELECT id, name FROM tags WHERE name = ? COLLATE NOCASE")
            .bind(name.trim())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::Validation(format!("Unknown tag '{}'", name.trim())))?;

        if !tags.iter().any(|t| t.id == tag.id) {
            tags.push(tag);
        }
    }

    Ok(tags)
}

#[instrument(skip(pool))]
pub async fn get_tags_for_questions(
    pool: &Pool<Sqlite>,
    question_ids: &[i64],
) -> Result<HashMap<i64, Vec<Tag>>, AppError> {
    let mut tags_by_question: HashMap<i64, Vec<Tag>> = HashMap::new();
    if question_ids.is_empty() {
        return Ok(tags_by_question);
    }

    #[derive(sqlx::FromRow)]
    struct QuestionTagRow {
        question_id: i64,
        id: i64,
        name: String,
    }

    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT qt.question_id, t.id, t.name
         FROM question_tags qt
         JOIN tags t ON t.id = qt.tag_id
         WHERE qt.question_id IN (",
    );
    let mut separated = builder.separated(", ");
    for id in question_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY t.name COLLATE NOCASE");

    let rows = builder
        .build_query_as::<QuestionTagRow>()
        .fetch_all(pool)
        .await?;

    for row in rows {
        tags_by_question
            .entry(row.question_id)
            .or_default()
            .push(Tag {
                id: row.id,
                name: row.name,
            });
    }

    Ok(tags_by_question)
}
