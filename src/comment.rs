use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::{delete as diesel_delete, insert_into};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};

use crate::article::Article;
use crate::db::schema::{comments, users};
use crate::db::DbConnection;
use crate::profile::Profile;
use crate::types::{ApiError, ApiResult};
use crate::users::models::User;
use crate::users::CurrentUser;
use crate::utils::serialize_date;

#[derive(Debug, Queryable, Identifiable, Serialize)]
#[diesel(table_name = comments)]
pub struct Comment {
    pub id: i32,
    pub article_id: i32,
    pub author_id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub body: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CommentView<'r> {
    id: i32,
    #[serde(serialize_with = "serialize_date")]
    created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_date")]
    updated_at: DateTime<Utc>,
    body: String,
    author: Profile<'r>,
}

impl<'r> From<(Comment, Profile<'r>)> for CommentView<'r> {
    fn from((comment, profile): (Comment, Profile<'r>)) -> Self {
        CommentView {
            id: comment.id,
            author: profile,
            created_at: comment.created_at,
            updated_at: comment.updated_at,
            body: comment.body,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comments)]
pub struct NewComment {
    article_id: i32,
    author_id: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentBody {
    body: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentContainer<T> {
    comment: T,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommentsContainer<T> {
    comments: T,
}

#[post("/<slug>/comments", format = "json", data = "<details>")]
pub fn add(
    mut conn: DbConnection,
    current_user: CurrentUser,
    slug: String,
    details: Json<CommentContainer<CommentBody>>,
) -> ApiResult<CommentContainer<CommentView<'static>>> {
    let user = current_user?;
    let details = details.into_inner();
    let article = Article::load_by_slug(&slug, &mut conn)?;
    let now = Utc::now();
    let new_comment = NewComment {
        article_id: article.id,
        author_id: user.id,
        created_at: now,
        updated_at: now,
        body: details.comment.body,
    };

    let comment = insert_into(comments::table)
        .values(&new_comment)
        .get_result::<Comment>(&mut *conn)?;

    let container = CommentContainer {
        comment: (comment, Profile::from_user(user, false)).into(),
    };
    Ok(Json(container))
}

#[get("/<slug>/comments", format = "json")]
pub fn get(
    mut conn: DbConnection,
    slug: String,
) -> ApiResult<CommentsContainer<Vec<CommentView<'static>>>> {
    let article = Article::load_by_slug(&slug, &mut conn)?;
    let data = comments::table
        .filter(comments::article_id.eq(article.id))
        .load::<Comment>(&mut *conn)?;

    let mut author_ids: Vec<i32> = data.iter().map(|comment| comment.author_id).collect();
    author_ids.sort_unstable();
    author_ids.dedup();
    let authors: HashMap<i32, User> = users::table
        .filter(users::id.eq_any(&author_ids))
        .load::<User>(&mut *conn)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    // Comment authors always render with following=false, viewer or not.
    let views = data
        .into_iter()
        .map(|comment| {
            let author = authors
                .get(&comment.author_id)
                .cloned()
                .ok_or(ApiError::Internal)?;
            Ok((comment, Profile::from_user(author, false)).into())
        })
        .collect::<Result<Vec<CommentView>, ApiError>>()?;

    Ok(Json(CommentsContainer { comments: views }))
}

#[delete("/<slug>/comments/<id>")]
pub fn delete(
    mut conn: DbConnection,
    current_user: CurrentUser,
    slug: String,
    id: i32,
) -> ApiResult<()> {
    let _user = current_user?;
    // The slug only gates article existence; the delete itself is by id and
    // carries no ownership restriction.
    let _article = Article::load_by_slug(&slug, &mut conn)?;

    let removed = diesel_delete(comments::table.filter(comments::id.eq(id)))
        .execute(&mut *conn)?;
    if removed == 0 {
        return Err(ApiError::NotFound);
    }
    Ok(Json(()))
}
