#[cfg(test)]
mod tests {
    use crate::auth::Role;
    use crate::db::{
        VoteOutcome, VoteTarget, connect, create_question, create_user, delete_question,
        get_question, get_score, get_user_vote, list_answers, run_migrations, toggle_vote,
    };
    use crate::error::AppError;
    use crate::models::VoteDirection;
    use crate::test::test_db::TestDbBuilder;
    use crate::test::test_utils::create_standard_test_db;
    use rocket::tokio;

    const QUESTION: &str = "How do I borrow twice?";

    #[tokio::test]
    async fn test_same_direction_twice_clears_vote() {
        let test_db = create_standard_test_db().await;
        let voter = test_db.user_id("voter").unwrap();
        let target = VoteTarget::Question(test_db.question_id(QUESTION).unwrap());

        let first = toggle_vote(&test_db.pool, voter, target, VoteDirection::Up)
            .await
            .expect("first vote");
        assert_eq!(
            first,
            VoteOutcome {
                vote: Some(VoteDirection::Up),
                score: 1
            }
        );

        let second = toggle_vote(&test_db.pool, voter, target, VoteDirection::Up)
            .await
            .expect("second vote");
        assert_eq!(
            second,
            VoteOutcome {
                vote: None,
                score: 0
            }
        );

        assert_eq!(
            test_db.vote_rows("question_votes", voter).await.unwrap(),
            0
        );
        assert_eq!(
            get_user_vote(&test_db.pool, voter, target).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_opposite_direction_replaces_vote() {
        let test_db = create_standard_test_db().await;
        let voter = test_db.user_id("voter").unwrap();
        let target = VoteTarget::Answer(test_db.answer_id("Use a RefCell").unwrap());

        toggle_vote(&test_db.pool, voter, target, VoteDirection::Up)
            .await
            .unwrap();
        let outcome = toggle_vote(&test_db.pool, voter, target, VoteDirection::Down)
            .await
            .unwrap();

        assert_eq!(outcome.vote, Some(VoteDirection::Down));
        assert_eq!(outcome.score, -1);
        assert_eq!(test_db.vote_rows("answer_votes", voter).await.unwrap(), 1);
        assert_eq!(
            get_user_vote(&test_db.pool, voter, target).await.unwrap(),
            Some(VoteDirection::Down)
        );
    }

    #[tokio::test]
    async fn test_score_is_sum_of_all_votes() {
        let test_db = create_standard_test_db().await;
        let question_id = test_db.question_id(QUESTION).unwrap();
        let target = VoteTarget::Question(question_id);

        for username in ["answerer", "voter"] {
            toggle_vote(
                &test_db.pool,
                test_db.user_id(username).unwrap(),
                target,
                VoteDirection::Up,
            )
            .await
            .unwrap();
        }
        let outcome = toggle_vote(
            &test_db.pool,
            test_db.user_id("moderator").unwrap(),
            target,
            VoteDirection::Down,
        )
        .await
        .unwrap();

        assert_eq!(outcome.score, 1);
        assert_eq!(get_score(&test_db.pool, target).await.unwrap(), 1);
        assert_eq!(get_question(&test_db.pool, question_id).await.unwrap().score, 1);
    }

    #[tokio::test]
    async fn test_long_toggle_sequence_keeps_one_row_at_most() {
        let test_db = create_standard_test_db().await;
        let voter = test_db.user_id("voter").unwrap();
        let target = VoteTarget::Question(test_db.question_id(QUESTION).unwrap());

        let presses = [
            VoteDirection::Up,
            VoteDirection::Down,
            VoteDirection::Down,
            VoteDirection::Down,
            VoteDirection::Up,
            VoteDirection::Up,
            VoteDirection::Up,
        ];
        let mut expected: Option<VoteDirection> = None;

        for press in presses {
            expected = if expected == Some(press) { None } else { Some(press) };

            let outcome = toggle_vote(&test_db.pool, voter, target, press)
                .await
                .unwrap();
            assert_eq!(outcome.vote, expected);
            assert_eq!(outcome.score, expected.map(|v| v.value()).unwrap_or(0));
            assert!(test_db.vote_rows("question_votes", voter).await.unwrap() <= 1);
        }
    }

    #[tokio::test]
    async fn test_question_and_answer_votes_are_independent() {
        let test_db = create_standard_test_db().await;
        let voter = test_db.user_id("voter").unwrap();
        let question = VoteTarget::Question(test_db.question_id(QUESTION).unwrap());
        let answer = VoteTarget::Answer(test_db.answer_id("Use a RefCell").unwrap());

        toggle_vote(&test_db.pool, voter, question, VoteDirection::Down)
            .await
            .unwrap();
        toggle_vote(&test_db.pool, voter, answer, VoteDirection::Up)
            .await
            .unwrap();

        assert_eq!(get_score(&test_db.pool, question).await.unwrap(), -1);
        assert_eq!(get_score(&test_db.pool, answer).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_vote_on_missing_item_is_not_found() {
        let test_db = create_standard_test_db().await;
        let voter = test_db.user_id("voter").unwrap();

        let result = toggle_vote(
            &test_db.pool,
            voter,
            VoteTarget::Answer(9999),
            VoteDirection::Up,
        )
        .await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
        assert_eq!(test_db.vote_rows("answer_votes", voter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_answers_are_ordered_by_score() {
        let test_db = create_standard_test_db().await;
        let question_id = test_db.question_id(QUESTION).unwrap();
        let second = test_db.answer_id("Split the struct").unwrap();

        toggle_vote(
            &test_db.pool,
            test_db.user_id("asker").unwrap(),
            VoteTarget::Answer(second),
            VoteDirection::Up,
        )
        .await
        .unwrap();

        let answers = list_answers(&test_db.pool, question_id, None, 30)
            .await
            .unwrap();
        assert_eq!(answers.items[0].id, second);
        assert_eq!(answers.items[0].score, 1);
        assert_eq!(answers.items[1].score, 0);
    }

    #[tokio::test]
    async fn test_deleting_question_removes_votes() {
        let test_db = TestDbBuilder::new()
            .member("asker", None)
            .member("voter", None)
            .question("Doomed", "asker", &[])
            .answer("Doomed answer", "Doomed", "asker")
            .build()
            .await
            .expect("Failed to build test database");
        let voter = test_db.user_id("voter").unwrap();
        let question_id = test_db.question_id("Doomed").unwrap();

        toggle_vote(
            &test_db.pool,
            voter,
            VoteTarget::Question(question_id),
            VoteDirection::Up,
        )
        .await
        .unwrap();
        toggle_vote(
            &test_db.pool,
            voter,
            VoteTarget::Answer(test_db.answer_id("Doomed answer").unwrap()),
            VoteDirection::Down,
        )
        .await
        .unwrap();

        delete_question(&test_db.pool, question_id).await.unwrap();

        assert_eq!(test_db.vote_rows("question_votes", voter).await.unwrap(), 0);
        assert_eq!(test_db.vote_rows("answer_votes", voter).await.unwrap(), 0);
    }

    struct FileDb {
        path: std::path::PathBuf,
    }

    impl FileDb {
        fn new() -> Self {
            let path = std::env::temp_dir().join(format!("askforum-{}.db", uuid::Uuid::new_v4()));
            FileDb { path }
        }

        fn url(&self) -> String {
            format!("sqlite://{}", self.path.display())
        }
    }

    impl Drop for FileDb {
        fn drop(&mut self) {
            for suffix in ["", "-wal", "-shm", "-journal"] {
                let mut name = self.path.clone().into_os_string();
                name.push(suffix);
                let _ = std::fs::remove_file(name);
            }
        }
    }

    async fn file_backed_question(
        file_db: &FileDb,
        usernames: &[&str],
    ) -> (sqlx::Pool<sqlx::Sqlite>, Vec<i64>, VoteTarget) {
        let pool = connect(&file_db.url()).await.expect("open file database");
        run_migrations(&pool).await.expect("migrations");

        let mut user_ids = Vec::new();
        for username in usernames {
            let id = create_user(
                &pool,
                username,
                &format!("{}@example.com", username),
                "password123",
                &Role::Member,
                None,
            )
            .await
            .expect("create user");
            user_ids.push(id);
        }

        let question_id = create_question(&pool, user_ids[0], "Concurrent presses", "Body", &[])
            .await
            .expect("create question");

        (pool, user_ids, VoteTarget::Question(question_id))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_presses_by_one_user_all_succeed() {
        let file_db = FileDb::new();
        let (pool, user_ids, target) = file_backed_question(&file_db, &["presser"]).await;
        let user_id = user_ids[0];

        let presses = 8;
        let handles: Vec<_> = (0..presses)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    toggle_vote(&pool, user_id, target, VoteDirection::Up).await
                })
            })
            .collect();

        for handle in handles {
            let outcome = handle.await.expect("task joined");
            assert!(outcome.is_ok(), "press failed: {:?}", outcome.err());
        }

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM question_votes WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        // An even number of serialized presses lands back on no vote.
        assert_eq!(rows, 0);
        assert_eq!(get_user_vote(&pool, user_id, target).await.unwrap(), None);
        assert_eq!(get_score(&pool, target).await.unwrap(), 0);

        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_presses_by_many_users_all_count() {
        let file_db = FileDb::new();
        let usernames = ["u1", "u2", "u3", "u4", "u5", "u6"];
        let (pool, user_ids, target) = file_backed_question(&file_db, &usernames).await;

        let handles: Vec<_> = user_ids
            .iter()
            .map(|&user_id| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    toggle_vote(&pool, user_id, target, VoteDirection::Up).await
                })
            })
            .collect();

        for handle in handles {
            let outcome = handle.await.expect("task joined");
            assert!(outcome.is_ok(), "press failed: {:?}", outcome.err());
        }

        assert_eq!(get_score(&pool, target).await.unwrap(), user_ids.len() as i64);
        for user_id in user_ids {
            assert_eq!(
                get_user_vote(&pool, user_id, target).await.unwrap(),
                Some(VoteDirection::Up)
            );
        }

        pool.close().await;
    }
}
