use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

/// Direction of a single user's vote on a question or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn value(self) -> i64 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl TryFrom<i64> for VoteDirection {
    type Error = AppError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(VoteDirection::Up),
            -1 => Ok(VoteDirection::Down),
            other => Err(AppError::Validation(format!(
                "Vote value must be 1 or -1, got {}",
                other
            ))),
        }
    }
}

impl From<VoteDirection> for i64 {
    fn from(direction: VoteDirection) -> Self {
        direction.value()
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteDirection::Up => write!(f, "up"),
            VoteDirection::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct TagWithCount {
    pub id: i64,
    pub name: String,
    pub question_count: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Question {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub author_id: i64,
    pub author_name: String, // Display name, falling back to username
    pub created_at: DateTime<Utc>,
    pub score: i64,
    pub answer_count: i64,
    pub correct_answer_id: Option<i64>,
    pub tags: Vec<Tag>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbQuestion {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub author_id: i64,
    pub author_name: String,
    pub created_at: NaiveDateTime,
    pub score: i64,
    pub answer_count: i64,
    pub correct_answer_id: Option<i64>,
}

impl DbQuestion {
    pub fn with_tags(self, tags: Vec<Tag>) -> Question {
        Question {
            id: self.id,
            title: self.title,
            body: self.body,
            author_id: self.author_id,
            author_name: self.author_name,
            created_at: self.created_at.and_utc(),
            score: self.score,
            answer_count: self.answer_count,
            correct_answer_id: self.correct_answer_id,
            tags,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Answer {
    pub id: i64,
    pub question_id: i64,
    pub body: String,
    pub author_id: i64,
    pub author_name: String,
    pub created_at: DateTime<Utc>,
    pub score: i64,
    pub is_correct: bool,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbAnswer {
    pub id: i64,
    pub question_id: i64,
    pub body: String,
    pub author_id: i64,
    pub author_name: String,
    pub created_at: NaiveDateTime,
    pub score: i64,
    pub is_correct: i64,
}

impl From<DbAnswer> for Answer {
    fn from(db: DbAnswer) -> Self {
        Self {
            id: db.id,
            question_id: db.question_id,
            body: db.body,
            author_id: db.author_id,
            author_name: db.author_name,
            created_at: db.created_at.and_utc(),
            score: db.score,
            is_correct: db.is_correct != 0,
        }
    }
}

/// Ordering for question listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuestionSort {
    /// Highest score first, newest first among equal scores.
    #[default]
    Hot,
    New,
}

impl QuestionSort {
    pub fn parse(value: Option<&str>) -> Result<Self, AppError> {
        match value {
            None | Some("hot") => Ok(QuestionSort::Hot),
            Some("new") => Ok(QuestionSort::New),
            Some(other) => Err(AppError::BadRequest(format!(
                "Unknown sort order '{}'",
                other
            ))),
        }
    }

    pub fn order_by(self) -> &'static str {
        match self {
            QuestionSort::Hot => "score DESC, q.created_at DESC, q.id DESC",
            QuestionSort::New => "q.created_at DESC, q.id DESC",
        }
    }
}
