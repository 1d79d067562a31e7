use std::borrow::Cow;

use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{delete as diesel_delete, insert_into, select};
use rocket::serde::json::Json;
use serde::Serialize;

use crate::db::DbConnection;
use crate::types::ApiResult;
use crate::users::models::User;
use crate::users::CurrentUser;

#[derive(Debug, Serialize)]
pub struct ProfileResponse<'a> {
    profile: Profile<'a>,
}

#[derive(Debug, Serialize)]
pub struct Profile<'a> {
    pub username: Cow<'a, str>,
    pub bio: Option<Cow<'a, str>>,
    pub image: Option<Cow<'a, str>>,
    pub following: bool,
}

impl Profile<'static> {
    pub fn from_user(user: User, following: bool) -> Self {
        Profile {
            username: Cow::Owned(user.username),
            bio: user.bio.map(Cow::Owned),
            image: user.image.map(Cow::Owned),
            following,
        }
    }
}

#[get("/profiles/<name>", format = "json")]
pub fn profile(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    use crate::db::schema::followers::dsl::*;

    let current = current_user?;
    let target = User::load_by_name(&name, &mut connection)?;
    let query = select(exists(
        followers
            .filter(follower_id.eq(current.id))
            .filter(followed_id.eq(target.id)),
    ));
    let following = query.get_result::<bool>(&mut *connection)?;

    Ok(Json(ProfileResponse {
        profile: Profile::from_user(target, following),
    }))
}

#[post("/profiles/<name>/follow")]
pub fn follow(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    use crate::db::schema::followers::dsl::*;

    let current = current_user?;
    let target = User::load_by_name(&name, &mut connection)?;
    insert_into(followers)
        .values((follower_id.eq(current.id), followed_id.eq(target.id)))
        .on_conflict((follower_id, followed_id))
        .do_nothing()
        .execute(&mut *connection)?;

    Ok(Json(ProfileResponse {
        profile: Profile::from_user(target, true),
    }))
}

#[delete("/profiles/<name>/follow")]
pub fn unfollow(
    mut connection: DbConnection,
    current_user: CurrentUser,
    name: String,
) -> ApiResult<ProfileResponse<'static>> {
    use crate::db::schema::followers::dsl::*;

    let current = current_user?;
    let target = User::load_by_name(&name, &mut connection)?;
    diesel_delete(
        followers
            .filter(follower_id.eq(current.id))
            .filter(followed_id.eq(target.id)),
    )
    .execute(&mut *connection)?;

    Ok(Json(ProfileResponse {
        profile: Profile::from_user(target, false),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_response_wraps_the_profile_envelope() {
        let response = ProfileResponse {
            profile: Profile {
                username: Cow::Borrowed("celeb"),
                bio: None,
                image: Some(Cow::Borrowed("https://example.com/avatar.jpg")),
                following: false,
            },
        };
        let as_json = serde_json::to_value(&response).unwrap();
        assert_eq!(as_json["profile"]["username"], "celeb");
        assert_eq!(as_json["profile"]["bio"], serde_json::Value::Null);
        assert_eq!(
            as_json["profile"]["image"],
            "https://example.com/avatar.jpg"
        );
        assert_eq!(as_json["profile"]["following"], false);
    }
}
