use std::sync::Arc;

use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, Role, SESSION_COOKIE, User, UserSession};
use crate::config::ForumConfig;
use crate::db::{
    UserProfile, VoteOutcome, VoteTarget, authenticate_user, create_answer, create_question,
    create_tag, create_user, create_user_session, delete_question, find_tag_by_name,
    get_all_tags, get_answer, get_question, get_user, get_user_answer_votes, get_user_profile,
    get_user_vote, invalidate_session, list_answers, list_questions, toggle_correct_answer,
    toggle_vote, trending_questions, update_user_password, update_user_profile,
};
use crate::models::{Answer, Question, QuestionSort, TagWithCount, VoteDirection};
use crate::notify::{NewAnswerNotice, Notifier, dispatch_new_answer};
use crate::pagination::Page;
use crate::search::QuestionFilter;
use crate::validation::{
    ApiError, AppErrorExt, JsonValidateExt, PermissionCheckExt, ToValidationResponse,
    ValidationResponse, validate_not_blank, validate_tag_limit, validate_tag_name,
    validate_username,
};

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub avatar_url: Option<String>,
    pub joined_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl UserData {
    /// Everything except the email address.
    pub fn public(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            display_name: user.display_name,
            role: user.role.to_string(),
            avatar_url: user.avatar_url,
            joined_at: user.created_at.to_rfc3339(),
            email: None,
        }
    }

    /// The signed-in user's own view, email included.
    pub fn private(user: User) -> Self {
        let email = user.email.clone();
        Self {
            email: Some(email),
            ..Self::public(user)
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CreatedResponse {
    pub id: i64,
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

// Accounts

#[derive(Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(
        length(min = 3, max = 50, message = "Username must be 3 to 50 characters"),
        custom(function = "validate_username")
    )]
    username: String,
    #[validate(email(message = "Enter a valid email address"))]
    email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
    #[validate(length(max = 100, message = "Display name is too long"))]
    display_name: Option<String>,
}

#[post("/signup", data = "<signup>")]
pub async fn api_signup(
    signup: Json<SignupRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<UserData>>, ApiError> {
    let validated = signup.validate_custom()?;

    let user_id = create_user(
        db,
        &validated.username,
        &validated.email,
        &validated.password,
        &Role::Member,
        validated.display_name.as_deref(),
    )
    .await
    .validate_field("username")?;

    let user = get_user(db, user_id).await.validate_custom()?;
    Ok(Custom(Status::Created, Json(UserData::private(user))))
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<LoginResponse>, ApiError> {
    use chrono::Utc;

    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(config.session_hours);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            let cookie = Cookie::build((SESSION_COOKIE, token))
                .same_site(SameSite::Lax)
                .http_only(true)
                .max_age(rocket::time::Duration::hours(config.session_hours));
            cookies.add_private(cookie);

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::private(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(cookies: &CookieJar<'_>, db: &State<Pool<Sqlite>>) -> Status {
    let token = cookies
        .get_private(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        if let Err(err) = invalidate_session(db, &token).await {
            err.log_and_record("Logout");
        }
    }

    cookies.remove_private(Cookie::build(SESSION_COOKIE));
    Status::NoContent
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::private(user))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[derive(Deserialize, Validate)]
pub struct ProfileUpdateRequest {
    #[validate(length(max = 100, message = "Display name is too long"))]
    display_name: String,
    #[validate(email(message = "Enter a valid email address"))]
    email: String,
    #[validate(url(message = "Avatar must be a URL"))]
    avatar_url: Option<String>,
}

#[put("/profile", data = "<profile>")]
pub async fn api_update_profile(
    profile: Json<ProfileUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserData>, ApiError> {
    user.require_permission(Permission::EditOwnProfile)
        .validate_custom()?;
    let validated = profile.validate_custom()?;

    update_user_profile(
        db,
        user.id,
        validated.display_name.trim(),
        &validated.email,
        validated.avatar_url.as_deref(),
    )
    .await
    .validate_custom()?;

    let updated = get_user(db, user.id).await.validate_custom()?;
    Ok(Json(UserData::private(updated)))
}

#[derive(Deserialize, Validate)]
pub struct PasswordChangeRequest {
    current_password: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    new_password: String,
}

#[post("/change-password", data = "<password>")]
pub async fn api_change_password(
    password: Json<PasswordChangeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, ApiError> {
    let validated = password.validate_custom()?;

    let is_valid = authenticate_user(db, &user.username, &validated.current_password)
        .await
        .validate_custom()?;

    match is_valid {
        Some(_) => {
            update_user_password(db, user.id, &validated.new_password)
                .await
                .validate_custom()?;

            Ok(Status::Ok)
        }
        _ => Err(Custom(
            Status::Unauthorized,
            Json(ValidationResponse::with_error(
                "current_password",
                "Current password is incorrect",
            )),
        )),
    }
}

#[derive(Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user: UserData,
    pub question_count: i64,
    pub answer_count: i64,
}

impl From<UserProfile> for ProfileResponse {
    fn from(profile: UserProfile) -> Self {
        Self {
            user: UserData::public(profile.user),
            question_count: profile.question_count,
            answer_count: profile.answer_count,
        }
    }
}

#[get("/users/<username>")]
pub async fn api_user_profile(
    username: &str,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProfileResponse>, Status> {
    let profile = get_user_profile(db, username).await?;
    Ok(Json(ProfileResponse::from(profile)))
}

// Questions

#[get("/questions?<page>&<sort>")]
pub async fn api_list_questions(
    page: Option<i64>,
    sort: Option<&str>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<Page<Question>>, ApiError> {
    let sort = QuestionSort::parse(sort).validate_custom()?;

    let questions = list_questions(
        db,
        &QuestionFilter::All,
        sort,
        page,
        config.questions_per_page,
    )
    .await
    .validate_custom()?;

    Ok(Json(questions))
}

#[get("/questions/search?<q>&<page>")]
pub async fn api_search_questions(
    q: Option<&str>,
    page: Option<i64>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<Page<Question>>, ApiError> {
    let filter = QuestionFilter::parse_search(q).validate_field("q")?;

    let questions = list_questions(
        db,
        &filter,
        QuestionSort::Hot,
        page,
        config.questions_per_page,
    )
    .await
    .validate_custom()?;

    Ok(Json(questions))
}

#[get("/questions/trending")]
pub async fn api_trending_questions(
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<Vec<Question>>, Status> {
    let questions = trending_questions(db, config.trending_count).await?;
    Ok(Json(questions))
}

#[get("/tags/<name>/questions?<page>")]
pub async fn api_tag_questions(
    name: &str,
    page: Option<i64>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<Page<Question>>, Status> {
    let tag = find_tag_by_name(db, name)
        .await?
        .ok_or(Status::NotFound)?;

    let questions = list_questions(
        db,
        &QuestionFilter::Tag(tag.name),
        QuestionSort::Hot,
        page,
        config.questions_per_page,
    )
    .await?;

    Ok(Json(questions))
}

#[derive(Deserialize, Validate)]
pub struct CreateQuestionRequest {
    #[validate(
        length(min = 1, max = 200, message = "Title must be 1 to 200 characters"),
        custom(function = "validate_not_blank")
    )]
    title: String,
    #[validate(custom(function = "validate_not_blank"))]
    body: String,
    #[serde(default)]
    #[validate(custom(function = "validate_tag_limit"))]
    tags: Vec<String>,
}

#[post("/questions", data = "<question>")]
pub async fn api_create_question(
    question: Json<CreateQuestionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    user.require_permission(Permission::AskQuestions)
        .validate_custom()?;
    let validated = question.validate_custom()?;

    let id = create_question(
        db,
        user.id,
        validated.title.trim(),
        &validated.body,
        &validated.tags,
    )
    .await
    .validate_field("tags")?;

    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}

#[derive(Serialize, Deserialize)]
pub struct AnswerResponse {
    #[serde(flatten)]
    pub answer: Answer,
    pub user_vote: Option<VoteDirection>,
}

#[derive(Serialize, Deserialize)]
pub struct QuestionDetailResponse {
    pub question: Question,
    pub user_vote: Option<VoteDirection>,
    pub answers: Page<AnswerResponse>,
    pub can_mark_correct: bool,
    pub can_delete: bool,
}

#[get("/questions/<id>?<page>")]
pub async fn api_question_detail(
    id: i64,
    page: Option<i64>,
    user: Option<User>,
    db: &State<Pool<Sqlite>>,
    config: &State<ForumConfig>,
) -> Result<Json<QuestionDetailResponse>, Status> {
    let question = get_question(db, id).await?;
    let answers = list_answers(db, id, page, config.answers_per_page).await?;

    let (user_vote, answer_votes) = match &user {
        Some(user) => {
            let answer_ids: Vec<i64> = answers.items.iter().map(|a| a.id).collect();
            (
                get_user_vote(db, user.id, VoteTarget::Question(id)).await?,
                get_user_answer_votes(db, user.id, &answer_ids).await?,
            )
        }
        None => (None, Default::default()),
    };

    let answers = answers.map(|answer| AnswerResponse {
        user_vote: answer_votes.get(&answer.id).copied(),
        answer,
    });

    let is_author = user.as_ref().is_some_and(|u| u.id == question.author_id);
    let can_delete = is_author
        || user
            .as_ref()
            .is_some_and(|u| u.has_permission(Permission::DeleteAnyQuestion));

    Ok(Json(QuestionDetailResponse {
        question,
        user_vote,
        answers,
        can_mark_correct: is_author,
        can_delete,
    }))
}

#[delete("/questions/<id>")]
pub async fn api_delete_question(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    let question = get_question(db, id).await?;
    user.require_owner_or(question.author_id, Permission::DeleteAnyQuestion)?;

    delete_question(db, id).await?;
    Ok(Status::NoContent)
}

// Answers

#[derive(Deserialize, Validate)]
pub struct CreateAnswerRequest {
    #[validate(custom(function = "validate_not_blank"))]
    body: String,
}

#[post("/questions/<id>/answers", data = "<answer>")]
pub async fn api_create_answer(
    id: i64,
    answer: Json<CreateAnswerRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    notifier: &State<Arc<dyn Notifier>>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    user.require_permission(Permission::PostAnswers)
        .validate_custom()?;
    let validated = answer.validate_custom()?;

    let question = get_question(db, id).await.validate_custom()?;
    let answer_id = create_answer(db, id, user.id, &validated.body)
        .await
        .validate_custom()?;

    if question.author_id != user.id {
        match get_user(db, question.author_id).await {
            Ok(author) => dispatch_new_answer(
                Arc::clone(notifier.inner()),
                NewAnswerNotice {
                    recipient_name: author.public_name().to_string(),
                    recipient_email: author.email,
                    question_id: question.id,
                    question_title: question.title,
                    answer_author: user.public_name().to_string(),
                },
            ),
            Err(err) => err.log_and_record("Looking up question author for notification"),
        }
    }

    Ok(Custom(
        Status::Created,
        Json(CreatedResponse { id: answer_id }),
    ))
}

#[derive(Serialize, Deserialize)]
pub struct CorrectAnswerResponse {
    pub question_id: i64,
    pub correct_answer_id: Option<i64>,
}

#[post("/answers/<id>/correct")]
pub async fn api_mark_correct(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CorrectAnswerResponse>, ApiError> {
    let answer = get_answer(db, id).await.validate_custom()?;
    let question = get_question(db, answer.question_id)
        .await
        .validate_custom()?;

    if question.author_id != user.id {
        tracing::warn!(
            username = %user.username,
            question_id = question.id,
            "Only the question author can mark the correct answer"
        );
        return Err(Status::Forbidden.to_validation_response());
    }

    let correct_answer_id = toggle_correct_answer(db, question.id, answer.id)
        .await
        .validate_custom()?;

    Ok(Json(CorrectAnswerResponse {
        question_id: question.id,
        correct_answer_id,
    }))
}

// Votes

#[derive(Deserialize)]
pub struct VoteRequest {
    value: VoteDirection,
}

async fn vote(
    target: VoteTarget,
    request: Json<VoteRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<VoteOutcome>, Status> {
    user.require_permission(Permission::Vote)?;

    let outcome = toggle_vote(db, user.id, target, request.value).await?;
    Ok(Json(outcome))
}

#[post("/questions/<id>/vote", data = "<request>")]
pub async fn api_vote_question(
    id: i64,
    request: Json<VoteRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<VoteOutcome>, Status> {
    vote(VoteTarget::Question(id), request, user, db).await
}

#[post("/answers/<id>/vote", data = "<request>")]
pub async fn api_vote_answer(
    id: i64,
    request: Json<VoteRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<VoteOutcome>, Status> {
    vote(VoteTarget::Answer(id), request, user, db).await
}

// Tags

#[derive(Deserialize, Validate)]
pub struct CreateTagRequest {
    #[validate(custom(function = "validate_tag_name"))]
    name: String,
}

#[derive(Serialize, Deserialize)]
pub struct TagsResponse {
    pub tags: Vec<TagWithCount>,
}

#[get("/tags")]
pub async fn api_get_all_tags(db: &State<Pool<Sqlite>>) -> Result<Json<TagsResponse>, Status> {
    let tags = get_all_tags(db).await?;
    Ok(Json(TagsResponse { tags }))
}

#[post("/tags", data = "<tag>")]
pub async fn api_create_tag(
    tag: Json<CreateTagRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Custom<Json<CreatedResponse>>, ApiError> {
    user.require_permission(Permission::CreateTags)
        .validate_custom()?;
    let validated = tag.validate_custom()?;

    let id = create_tag(db, &validated.name)
        .await
        .validate_field("name")?;

    Ok(Custom(Status::Created, Json(CreatedResponse { id })))
}
