use std::collections::HashSet;

use diesel::prelude::*;
use rocket::serde::json::Json;
use serde::Serialize;

use crate::db::schema::articles;
use crate::db::DbConnection;
use crate::types::ApiResult;

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    tags: Vec<String>,
}

/// Flattens every article's tag list into the distinct values, first-seen
/// order preserved, no sorting and no counts.
fn distinct_tags<I>(tag_lists: I) -> Vec<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    for tag in tag_lists.into_iter().flatten() {
        if seen.insert(tag.clone()) {
            tags.push(tag);
        }
    }
    tags
}

#[get("/tags", format = "json")]
pub fn tags(mut connection: DbConnection) -> ApiResult<TagsResponse> {
    let tag_lists = articles::table
        .select(articles::tag_list)
        .load::<Vec<String>>(&mut *connection)?;

    Ok(Json(TagsResponse {
        tags: distinct_tags(tag_lists),
    }))
}
