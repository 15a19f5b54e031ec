pub mod test_db {
    use crate::auth::Role;
    use crate::db::{create_answer, create_question, create_tag, create_user};
    use crate::error::AppError;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        tags: Vec<String>,
        questions: Vec<TestQuestion>,
        answers: Vec<TestAnswer>,
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    pub struct TestQuestion {
        pub title: String,
        pub body: String,
        pub author: String,
        pub tags: Vec<String>,
    }

    pub struct TestAnswer {
        pub label: String,
        pub question_title: String,
        pub author: String,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn member(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Member,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn admin(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Admin,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn tag(mut self, name: &str) -> Self {
            self.tags.push(name.to_string());
            self
        }

        pub fn question(mut self, title: &str, author: &str, tags: &[&str]) -> Self {
            self.questions.push(TestQuestion {
                title: title.to_string(),
                body: format!("Body of {}", title),
                author: author.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            });
            self
        }

        pub fn question_with_body(
            mut self,
            title: &str,
            body: &str,
            author: &str,
            tags: &[&str],
        ) -> Self {
            self.questions.push(TestQuestion {
                title: title.to_string(),
                body: body.to_string(),
                author: author.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
            });
            self
        }

        /// `label` doubles as the answer body and the key for `answer_id`.
        pub fn answer(mut self, label: &str, question_title: &str, author: &str) -> Self {
            self.answers.push(TestAnswer {
                label: label.to_string(),
                question_title: question_title.to_string(),
                author: author.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder()
                    .parse_filters("debug")
                    .is_test(true)
                    .try_init();
            });

            // A single long-lived connection keeps the in-memory database alive.
            let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut tag_id_map: HashMap<String, i64> = HashMap::new();
            let mut question_id_map: HashMap<String, i64> = HashMap::new();
            let mut answer_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &format!("{}@example.com", user.username),
                    &user.password,
                    &user.role,
                    user.display_name.as_deref(),
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            for tag in &self.tags {
                let tag_id = create_tag(&pool, tag).await?;
                tag_id_map.insert(tag.clone(), tag_id);
            }

            for question in &self.questions {
                let author_id = user_id_map.get(&question.author).copied().ok_or_else(|| {
                    AppError::NotFound(format!("Test user {} not declared", question.author))
                })?;

                let question_id = create_question(
                    &pool,
                    author_id,
                    &question.title,
                    &question.body,
                    &question.tags,
                )
                .await?;

                question_id_map.insert(question.title.clone(), question_id);
            }

            for answer in &self.answers {
                let author_id = user_id_map.get(&answer.author).copied().ok_or_else(|| {
                    AppError::NotFound(format!("Test user {} not declared", answer.author))
                })?;
                let question_id = question_id_map
                    .get(&answer.question_title)
                    .copied()
                    .ok_or_else(|| {
                        AppError::NotFound(format!(
                            "Test question {} not declared",
                            answer.question_title
                        ))
                    })?;

                let answer_id = create_answer(&pool, question_id, author_id, &answer.label).await?;
                answer_id_map.insert(answer.label.clone(), answer_id);
            }

            Ok(TestDb {
                pool,
                user_id_map,
                tag_id_map,
                question_id_map,
                answer_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub tag_id_map: HashMap<String, i64>,
        pub question_id_map: HashMap<String, i64>,
        pub answer_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn tag_id(&self, name: &str) -> Option<i64> {
            self.tag_id_map.get(name).copied()
        }

        pub fn question_id(&self, title: &str) -> Option<i64> {
            self.question_id_map.get(title).copied()
        }

        pub fn answer_id(&self, label: &str) -> Option<i64> {
            self.answer_id_map.get(label).copied()
        }

        pub async fn vote_rows(&self, table: &str, user_id: i64) -> Result<i64, sqlx::Error> {
            sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {} WHERE user_id = ?",
                table
            ))
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
        }
    }
}

pub mod test_utils {
    use std::sync::{Arc, Mutex};

    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;
    use sqlx::{Pool, Sqlite};

    use super::test_db::{TestDb, TestDbBuilder};
    use crate::build_rocket;
    use crate::config::ForumConfig;
    use crate::error::AppError;
    use crate::notify::{NewAnswerNotice, Notifier};

    /// Remembers every notice it receives; optionally fails each delivery.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub notices: Mutex<Vec<NewAnswerNotice>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub fn failing() -> Self {
            Self {
                notices: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn received(&self) -> Vec<NewAnswerNotice> {
            self.notices
                .lock()
                .map(|notices| notices.clone())
                .unwrap_or_default()
        }
    }

    #[rocket::async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_new_answer(&self, notice: &NewAnswerNotice) -> Result<(), AppError> {
            if let Ok(mut notices) = self.notices.lock() {
                notices.push(notice.clone());
            }

            if self.fail {
                return Err(AppError::ExternalService("mail relay down".to_string()));
            }
            Ok(())
        }
    }

    /// Four users, two tags, one tagged question with two answers.
    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .member("asker", Some("Ada Asker"))
            .member("answerer", None)
            .member("voter", Some("Vic Voter"))
            .admin("moderator", Some("Mod"))
            .tag("rust")
            .tag("sqlite")
            .question("How do I borrow twice?", "asker", &["rust"])
            .answer("Use a RefCell", "How do I borrow twice?", "answerer")
            .answer("Split the struct", "How do I borrow twice?", "voter")
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, Pool<Sqlite>) {
        setup_test_client_with(
            test_db,
            ForumConfig::default(),
            Arc::new(RecordingNotifier::default()),
        )
        .await
    }

    pub async fn setup_test_client_with(
        test_db: TestDb,
        config: ForumConfig,
        notifier: Arc<dyn Notifier>,
    ) -> (Client, Pool<Sqlite>) {
        let pool = test_db.pool.clone();
        let rocket = build_rocket(rocket::Config::figment(), test_db.pool, config, notifier);

        let client = Client::untracked(rocket)
            .await
            .expect("valid rocket instance");

        (client, pool)
    }

    pub async fn login_test_user(
        client: &Client,
        username: &str,
        password: &str,
    ) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        response.cookies().iter().cloned().collect()
    }
}
