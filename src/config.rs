use rocket::figment::Figment;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Forum settings read from `Rocket.toml` or `ROCKET_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ForumConfig {
    pub questions_per_page: i64,
    pub answers_per_page: i64,
    pub trending_count: i64,
    pub session_hours: i64,
    pub notification_sender: String,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self {
            questions_per_page: 20,
            answers_per_page: 30,
            trending_count: 20,
            session_hours: 1,
            notification_sender: "noreply@askforum.local".to_string(),
        }
    }
}

impl ForumConfig {
    pub fn from_figment(figment: &Figment) -> Result<Self, Error> {
        let config: ForumConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.questions_per_page < 1 || self.answers_per_page < 1 {
            return Err(anyhow::anyhow!("Page sizes must be at least 1").into());
        }
        if self.trending_count < 0 {
            return Err(anyhow::anyhow!("trending_count cannot be negative").into());
        }
        if self.session_hours < 1 {
            return Err(anyhow::anyhow!("session_hours must be at least 1").into());
        }
        Ok(())
    }
}
