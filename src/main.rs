#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod config;
mod db;
mod env;
mod error;
mod models;
mod notify;
mod pagination;
mod search;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::sync::Arc;

use api::{
    api_change_password, api_create_answer, api_create_question, api_create_tag,
    api_delete_question, api_get_all_tags, api_list_questions, api_login, api_logout,
    api_mark_correct, api_me, api_me_unauthorized, api_question_detail, api_search_questions,
    api_signup, api_tag_questions, api_trending_questions, api_update_profile, api_user_profile,
    api_vote_answer, api_vote_question, health,
};
use auth::{forbidden_api, not_found_api, unauthorized_api};
use config::ForumConfig;
use db::clean_expired_sessions;
use error::AppError;
use notify::{LogNotifier, Notifier};
use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::{Build, Rocket, tokio};
use telemetry::{TelemetryFairing, init_tracing, shutdown_telemetry};
use thiserror::Error;

use sqlx::SqlitePool;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Anyhow(anyhow::Error),
    #[error("{0}")]
    Figment(rocket::figment::Error),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Error::Anyhow(value)
    }
}

impl From<rocket::figment::Error> for Error {
    fn from(value: rocket::figment::Error) -> Self {
        Error::Figment(value)
    }
}

#[launch]
async fn rocket() -> _ {
    if let Err(e) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }
    init_tracing();

    let pool = match prepare_database(&env::database_url()).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to prepare database: {}", e);
            panic!("Database setup failed: {}", e);
        }
    };

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    match init_rocket(rocket::Config::figment(), pool) {
        Ok(rocket) => rocket,
        Err(e) => {
            error!("Invalid forum configuration: {}", e);
            panic!("Invalid forum configuration: {}", e);
        }
    }
}

async fn prepare_database(database_url: &str) -> Result<SqlitePool, Error> {
    let pool = db::connect(database_url).await?;

    info!("Running database migrations...");
    db::run_migrations(&pool).await?;
    info!("Migrations completed successfully");

    Ok(pool)
}

pub fn init_rocket(figment: Figment, pool: SqlitePool) -> Result<Rocket<Build>, Error> {
    let config = ForumConfig::from_figment(&figment)?;
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(&config.notification_sender));

    Ok(build_rocket(figment, pool, config, notifier))
}

pub fn build_rocket(
    figment: Figment,
    pool: SqlitePool,
    config: ForumConfig,
    notifier: Arc<dyn Notifier>,
) -> Rocket<Build> {
    info!("Starting askforum");

    rocket::custom(figment)
        .manage(pool)
        .manage(config)
        .manage(notifier)
        .mount(
            "/api",
            routes![
                api_signup,
                api_login,
                api_logout,
                api_me,
                api_me_unauthorized,
                api_update_profile,
                api_change_password,
                api_user_profile,
                api_list_questions,
                api_search_questions,
                api_trending_questions,
                api_tag_questions,
                api_create_question,
                api_question_detail,
                api_delete_question,
                api_create_answer,
                api_mark_correct,
                api_vote_question,
                api_vote_answer,
                api_get_all_tags,
                api_create_tag,
            ],
        )
        .register(
            "/api",
            catchers![unauthorized_api, forbidden_api, not_found_api],
        )
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
        .attach(AdHoc::on_shutdown("Telemetry shutdown", |_| {
            Box::pin(async { shutdown_telemetry() })
        }))
}
