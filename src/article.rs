use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::{delete as diesel_delete, insert_into, select, update as diesel_update};
use log::info;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};

use crate::db::schema::{articles, comments, favorites, followers, users};
use crate::db::DbConnection;
use crate::profile::Profile;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::serialize_date;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize)]
#[diesel(table_name = articles)]
pub struct Article {
    #[serde(skip_serializing)]
    pub id: i32,
    #[serde(skip_serializing)]
    pub author_id: i32,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub body: String,
    pub tag_list: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    pub fn load_by_slug(slug_: &str, connection: &mut PgConnection) -> Result<Article, ApiError> {
        use crate::db::schema::articles::dsl::*;
        articles
            .filter(slug.eq(slug_))
            .get_result::<Article>(connection)
            .map_err(|e| e.into())
    }
}

/// Slugs join the title's space-separated words with hyphens, nothing more:
/// case and punctuation survive, and the result is derived exactly once at
/// creation time.
pub fn derive_slug(title: &str) -> String {
    title.split(' ').collect::<Vec<_>>().join("-")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView<'a> {
    slug: String,
    title: String,
    description: String,
    body: String,
    tag_list: Vec<String>,
    #[serde(serialize_with = "serialize_date")]
    created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_date")]
    updated_at: DateTime<Utc>,
    favorited: bool,
    favorites_count: i64,
    author: Profile<'a>,
}

impl<'a> ArticleView<'a> {
    fn compose(
        article: Article,
        author: Profile<'a>,
        favoriter_ids: &[i32],
        viewer_id: Option<i32>,
    ) -> Self {
        ArticleView {
            slug: article.slug,
            title: article.title,
            description: article.description,
            body: article.body,
            tag_list: article.tag_list,
            created_at: article.created_at,
            updated_at: article.updated_at,
            favorited: viewer_id.map_or(false, |id| favoriter_ids.contains(&id)),
            favorites_count: favoriter_ids.len() as i64,
            author,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArticleResponse<'a> {
    article: ArticleView<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticlesResponse<'a> {
    articles: Vec<ArticleView<'a>>,
    articles_count: usize,
}

/// The window is already paginated; these run in memory afterwards, so a page
/// can come back smaller than the limit even when more matches exist past the
/// window boundary.
fn filter_page_by_tag(page: Vec<Article>, tag: &str) -> Vec<Article> {
    page.into_iter()
        .filter(|article| article.tag_list.iter().any(|t| t == tag))
        .collect()
}

fn filter_page_by_favoriter(page: Vec<Article>, favorite_ids: &HashSet<i32>) -> Vec<Article> {
    page.into_iter()
        .filter(|article| favorite_ids.contains(&article.id))
        .collect()
}

fn filter_page_by_followed(page: Vec<Article>, followed_ids: &HashSet<i32>) -> Vec<Article> {
    page.into_iter()
        .filter(|article| followed_ids.contains(&article.author_id))
        .collect()
}

fn favoriters_of(article_id_: i32, connection: &mut PgConnection) -> Result<Vec<i32>, ApiError> {
    use crate::db::schema::favorites::dsl::*;
    favorites
        .filter(article_id.eq(article_id_))
        .select(user_id)
        .load::<i32>(connection)
        .map_err(|e| e.into())
}

/// Annotates a page of articles with author profiles and the viewer's
/// favorited/following flags. One batched query per collection, joined in
/// memory, the way the underlying store is meant to be used.
fn load_views(
    page: Vec<Article>,
    viewer: Option<&User>,
    connection: &mut PgConnection,
) -> Result<Vec<ArticleView<'static>>, ApiError> {
    if page.is_empty() {
        return Ok(Vec::new());
    }

    let article_ids: Vec<i32> = page.iter().map(|a| a.id).collect();
    let mut author_ids: Vec<i32> = page.iter().map(|a| a.author_id).collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let authors: HashMap<i32, User> = users::table
        .filter(users::id.eq_any(&author_ids))
        .load::<User>(connection)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let mut favoriters: HashMap<i32, Vec<i32>> = HashMap::new();
    let favorite_rows = favorites::table
        .filter(favorites::article_id.eq_any(&article_ids))
        .select((favorites::article_id, favorites::user_id))
        .load::<(i32, i32)>(connection)?;
    for (article_id, user_id) in favorite_rows {
        favoriters.entry(article_id).or_default().push(user_id);
    }

    let followed: HashSet<i32> = match viewer {
        Some(viewer) => followers::table
            .filter(followers::follower_id.eq(viewer.id))
            .filter(followers::followed_id.eq_any(&author_ids))
            .select(followers::followed_id)
            .load::<i32>(connection)?
            .into_iter()
            .collect(),
        None => HashSet::new(),
    };

    let viewer_id = viewer.map(|v| v.id);
    let mut views = Vec::with_capacity(page.len());
    for article in page {
        let author = authors
            .get(&article.author_id)
            .cloned()
            .ok_or(ApiError::Internal)?;
        let following = followed.contains(&author.id);
        let favoriter_ids = favoriters.remove(&article.id).unwrap_or_default();
        views.push(ArticleView::compose(
            article,
            Profile::from_user(author, following),
            &favoriter_ids,
            viewer_id,
        ));
    }
    Ok(views)
}

#[get("/?<tag>&<author>&<favorited>&<limit>&<offset>", format = "json")]
pub fn list(
    mut connection: DbConnection,
    user: Option<User>,
    tag: Option<String>,
    author: Option<String>,
    favorited: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<ArticlesResponse<'static>> {
    let mut query = articles::table.into_boxed();
    if let Some(ref author_name) = author {
        // An unknown author just drops the filter; only an unknown favoriter
        // below is a lookup failure.
        let author_user = users::table
            .filter(users::username.eq(author_name))
            .first::<User>(&mut *connection)
            .optional()?;
        if let Some(author_user) = author_user {
            query = query.filter(articles::author_id.eq(author_user.id));
        }
    }

    let mut page = query
        .order(articles::updated_at.desc())
        .offset(offset.unwrap_or(0))
        .limit(limit.unwrap_or(10))
        .load::<Article>(&mut *connection)?;

    if let Some(ref tag) = tag {
        page = filter_page_by_tag(page, tag);
    }

    if let Some(ref favoriter_name) = favorited {
        let favoriter = User::load_by_name(favoriter_name, &mut connection)?;
        let favorite_ids: HashSet<i32> = favorites::table
            .filter(favorites::user_id.eq(favoriter.id))
            .select(favorites::article_id)
            .load::<i32>(&mut *connection)?
            .into_iter()
            .collect();
        page = filter_page_by_favoriter(page, &favorite_ids);
    }

    let articles = load_views(page, user.as_ref(), &mut connection)?;
    Ok(Json(ArticlesResponse {
        articles_count: articles.len(),
        articles,
    }))
}

#[get("/feed?<limit>&<offset>", format = "json")]
pub fn feed(
    mut connection: DbConnection,
    current_user: CurrentUser,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<ArticlesResponse<'static>> {
    let user = current_user?;
    let page = articles::table
        .order(articles::updated_at.desc())
        .offset(offset.unwrap_or(0))
        .limit(limit.unwrap_or(10))
        .load::<Article>(&mut *connection)?;

    let followed: HashSet<i32> = followers::table
        .filter(followers::follower_id.eq(user.id))
        .select(followers::followed_id)
        .load::<i32>(&mut *connection)?
        .into_iter()
        .collect();
    let page = filter_page_by_followed(page, &followed);

    let articles = load_views(page, Some(&user), &mut connection)?;
    Ok(Json(ArticlesResponse {
        articles_count: articles.len(),
        articles,
    }))
}

#[get("/<slug>", format = "json", rank = 2)]
pub fn get(
    mut connection: DbConnection,
    user: Option<User>,
    slug: String,
) -> ApiResult<ArticleResponse<'static>> {
    let article = Article::load_by_slug(&slug, &mut connection)?;
    let article = load_views(vec![article], user.as_ref(), &mut connection)?
        .pop()
        .ok_or(ApiError::Internal)?;
    Ok(Json(ArticleResponse { article }))
}

#[derive(Debug, Insertable)]
#[diesel(table_name = articles)]
pub struct NewArticle {
    author_id: i32,
    slug: String,
    title: String,
    description: String,
    body: String,
    tag_list: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ArticleDetails {
    title: String,
    description: String,
    body: String,
    #[serde(rename = "tagList", default)]
    tag_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateArticle {
    article: ArticleDetails,
}

impl CreateArticle {
    fn field_errors(&self) -> ValidationError {
        let mut error = ValidationError::default();
        if self.article.body.trim().is_empty() {
            error.add_error("body", "empty body");
        }

        if self.article.title.trim().is_empty() {
            error.add_error("title", "empty title");
        }

        if self.article.description.trim().is_empty() {
            error.add_error("description", "empty description");
        }
        error
    }
}

impl Validate for CreateArticle {
    type Error = ValidationError;
    fn validate(self, _connection: &mut PgConnection) -> Result<Self, ValidationError> {
        let error = self.field_errors();
        if error.empty() {
            Ok(self)
        } else {
            Err(error)
        }
    }
}

#[post("/", format = "json", data = "<create>")]
pub fn create(
    mut connection: DbConnection,
    current_user: CurrentUser,
    create: Json<CreateArticle>,
) -> ApiResult<ArticleResponse<'static>> {
    let user = current_user?;
    let create = create.validate(&mut connection)?.into_inner();
    let now = Utc::now();
    let new_article = NewArticle {
        author_id: user.id,
        slug: derive_slug(&create.article.title),
        title: create.article.title,
        description: create.article.description,
        body: create.article.body,
        tag_list: create.article.tag_list,
        created_at: now,
        updated_at: now,
    };

    let article = insert_into(articles::table)
        .values(&new_article)
        .get_result::<Article>(&mut *connection)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ) => ApiError::BadRequest("bad request"),
            other => other.into(),
        })?;

    // The author starts out favoriting their own article.
    insert_into(favorites::table)
        .values((
            favorites::article_id.eq(article.id),
            favorites::user_id.eq(user.id),
        ))
        .on_conflict((favorites::user_id, favorites::article_id))
        .do_nothing()
        .execute(&mut *connection)?;
    info!("created article {}", article.slug);

    let viewer_id = user.id;
    let article = ArticleView::compose(
        article,
        Profile::from_user(user, false),
        &[viewer_id],
        Some(viewer_id),
    );
    Ok(Json(ArticleResponse { article }))
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = articles)]
pub struct UpdateDetails {
    title: Option<String>,
    description: Option<String>,
    body: Option<String>,
    #[serde(skip)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateArticle {
    article: UpdateDetails,
}

#[put("/<slug>", format = "json", data = "<update>")]
pub fn update(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
    update: Json<UpdateArticle>,
) -> ApiResult<ArticleResponse<'static>> {
    let user = current_user?;
    let mut details = update.into_inner().article;
    // The slug is never recomputed from a new title.
    details.updated_at = Some(Utc::now());

    let article = diesel_update(articles::table.filter(articles::slug.eq(&slug)))
        .set(&details)
        .get_result::<Article>(&mut *connection)?;

    let author = users::table
        .find(article.author_id)
        .first::<User>(&mut *connection)?;
    let favoriter_ids = favoriters_of(article.id, &mut connection)?;
    let article = ArticleView::compose(
        article,
        Profile::from_user(author, false),
        &favoriter_ids,
        Some(user.id),
    );
    Ok(Json(ArticleResponse { article }))
}

#[delete("/<slug>")]
pub fn delete(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
) -> ApiResult<()> {
    let _user = current_user?;
    let article = Article::load_by_slug(&slug, &mut connection)?;

    // No store-level cascade: the article row goes first, then its dependent
    // comment and favorite rows.
    diesel_delete(articles::table.filter(articles::id.eq(article.id)))
        .execute(&mut *connection)?;
    let removed_comments = diesel_delete(comments::table.filter(comments::article_id.eq(article.id)))
        .execute(&mut *connection)?;
    diesel_delete(favorites::table.filter(favorites::article_id.eq(article.id)))
        .execute(&mut *connection)?;
    info!("deleted article {} and {} comments", article.slug, removed_comments);

    Ok(Json(()))
}

#[post("/<slug>/favorite")]
pub fn favorite(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
) -> ApiResult<ArticleResponse<'static>> {
    use crate::db::schema::favorites::dsl::*;

    let user = current_user?;
    let article = Article::load_by_slug(&slug, &mut connection)?;

    let already_favorited = select(diesel::dsl::exists(
        favorites
            .filter(user_id.eq(user.id))
            .filter(article_id.eq(article.id)),
    ))
    .get_result::<bool>(&mut *connection)?;

    if !already_favorited {
        insert_into(favorites)
            .values((user_id.eq(user.id), article_id.eq(article.id)))
            .on_conflict((user_id, article_id))
            .do_nothing()
            .execute(&mut *connection)?;
    }

    let article = load_views(vec![article], Some(&user), &mut connection)?
        .pop()
        .ok_or(ApiError::Internal)?;
    Ok(Json(ArticleResponse { article }))
}

#[delete("/<slug>/favorite")]
pub fn unfavorite(
    mut connection: DbConnection,
    current_user: CurrentUser,
    slug: String,
) -> ApiResult<ArticleResponse<'static>> {
    use crate::db::schema::favorites::dsl::*;

    let user = current_user?;
    let article = Article::load_by_slug(&slug, &mut connection)?;

    diesel_delete(
        favorites
            .filter(user_id.eq(user.id))
            .filter(article_id.eq(article.id)),
    )
    .execute(&mut *connection)?;

    let article = load_views(vec![article], Some(&user), &mut connection)?
        .pop()
        .ok_or(ApiError::Internal)?;
    Ok(Json(ArticleResponse { article }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::borrow::Cow;

    fn article(id: i32, author_id: i32, slug: &str, tags: &[&str]) -> Article {
        let stamp = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        Article {
            id,
            author_id,
            slug: slug.to_owned(),
            title: slug.to_owned(),
            description: "description".to_owned(),
            body: "body".to_owned(),
            tag_list: tags.iter().map(|t| t.to_string()).collect(),
            created_at: stamp,
            updated_at: stamp,
        }
    }

    fn profile(username: &str, following: bool) -> Profile<'static> {
        Profile {
            username: Cow::Owned(username.to_owned()),
            bio: None,
            image: None,
            following,
        }
    }

    #[test]
    fn slug_joins_title_words_with_hyphens() {
        assert_eq!(derive_slug("My First Post"), "My-First-Post");
    }

    #[test]
    fn slug_preserves_case_and_punctuation() {
        assert_eq!(derive_slug("Hello, World!"), "Hello,-World!");
        assert_eq!(derive_slug("already-hyphenated"), "already-hyphenated");
    }

    #[test]
    fn slug_keeps_empty_words_from_repeated_spaces() {
        assert_eq!(derive_slug("a  b"), "a--b");
    }

    // The tag filter runs after the offset/limit window, so a page may hold
    // fewer matches than the limit even though more exist past the boundary.
    #[test]
    fn tag_filter_can_underfill_a_page() {
        let all = vec![
            article(1, 1, "one", &["x"]),
            article(2, 1, "two", &["y"]),
            article(3, 1, "three", &["x"]),
            article(4, 1, "four", &["y"]),
            article(5, 1, "five", &["y"]),
            article(6, 1, "six", &["x"]),
        ];
        let limit = 5;
        let window: Vec<Article> = all.into_iter().take(limit).collect();

        let page = filter_page_by_tag(window, "x");
        // Three "x" articles exist, but only the two inside the window remain.
        assert_eq!(page.len(), 2);
        assert!(page.len() < limit);
        let slugs: Vec<&str> = page.iter().map(|a| a.slug.as_str()).collect();
        assert_eq!(slugs, vec!["one", "three"]);
    }

    #[test]
    fn favoriter_filter_keeps_only_favorited_articles() {
        let window = vec![
            article(1, 1, "one", &[]),
            article(2, 1, "two", &[]),
            article(3, 1, "three", &[]),
        ];
        let favorite_ids: HashSet<i32> = [1, 3].into_iter().collect();
        let page = filter_page_by_favoriter(window, &favorite_ids);
        let slugs: Vec<&str> = page.iter().map(|a| a.slug.as_str()).collect();
        assert_eq!(slugs, vec!["one", "three"]);
    }

    #[test]
    fn feed_filter_keeps_only_followed_authors() {
        let window = vec![
            article(1, 10, "one", &[]),
            article(2, 20, "two", &[]),
            article(3, 10, "three", &[]),
        ];
        let followed: HashSet<i32> = [10].into_iter().collect();
        let page = filter_page_by_followed(window, &followed);
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|a| a.author_id == 10));
    }

    #[test]
    fn compose_marks_the_viewer_favorite_and_counts_the_set() {
        let view = ArticleView::compose(
            article(1, 1, "one", &[]),
            profile("author", false),
            &[7, 8],
            Some(7),
        );
        assert!(view.favorited);
        assert_eq!(view.favorites_count, 2);

        let view = ArticleView::compose(
            article(1, 1, "one", &[]),
            profile("author", false),
            &[7, 8],
            Some(9),
        );
        assert!(!view.favorited);
        assert_eq!(view.favorites_count, 2);
    }

    #[test]
    fn anonymous_viewers_never_see_favorited() {
        let view = ArticleView::compose(
            article(1, 1, "one", &[]),
            profile("author", false),
            &[7, 8],
            None,
        );
        assert!(!view.favorited);
        assert_eq!(view.favorites_count, 2);
    }

    #[test]
    fn article_view_serializes_with_camel_case_wire_fields() {
        let view = ArticleView::compose(
            article(1, 1, "My-First-Post", &["rust", "web"]),
            profile("jake", true),
            &[1],
            Some(1),
        );
        let as_json = serde_json::to_value(&view).unwrap();
        assert_eq!(as_json["slug"], "My-First-Post");
        assert_eq!(as_json["tagList"], serde_json::json!(["rust", "web"]));
        assert_eq!(as_json["favoritesCount"], 1);
        assert_eq!(as_json["favorited"], true);
        assert_eq!(as_json["createdAt"], "2021-01-01T00:00:00.000Z");
        assert_eq!(as_json["updatedAt"], "2021-01-01T00:00:00.000Z");
        assert_eq!(as_json["author"]["username"], "jake");
        assert_eq!(as_json["author"]["following"], true);
    }

    #[test]
    fn articles_response_counts_the_returned_page() {
        let response = ArticlesResponse {
            articles: vec![ArticleView::compose(
                article(1, 1, "one", &[]),
                profile("jake", false),
                &[],
                None,
            )],
            articles_count: 1,
        };
        let as_json = serde_json::to_value(&response).unwrap();
        assert_eq!(as_json["articlesCount"], 1);
        assert_eq!(as_json["articles"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn create_payload_defaults_the_tag_list() {
        let create: CreateArticle = serde_json::from_value(serde_json::json!({
            "article": {
                "title": "How to train your dragon",
                "description": "Ever wonder how?",
                "body": "It takes a Jacobian"
            }
        }))
        .unwrap();
        assert!(create.article.tag_list.is_empty());
    }

    #[test]
    fn create_payload_rejects_blank_fields() {
        let create = CreateArticle {
            article: ArticleDetails {
                title: "  ".to_owned(),
                description: "ok".to_owned(),
                body: "".to_owned(),
                tag_list: vec![],
            },
        };
        let error = create.field_errors();
        assert!(!error.empty());
        let as_json = serde_json::to_value(&error).unwrap();
        assert!(as_json.get("title").is_some());
        assert!(as_json.get("body").is_some());
        assert!(as_json.get("description").is_none());
    }
}
