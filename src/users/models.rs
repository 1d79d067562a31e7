use std::borrow::Cow;

use diesel::prelude::*;
use serde::Serialize;

use super::utils::{issue_token, signing_key, verify_token};
use crate::db::schema::users;
use crate::profile::Profile;
use crate::types::ApiError;

#[derive(Debug, Clone, Queryable, Identifiable, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub email: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

impl User {
    pub fn make_password(password: &str) -> Result<String, ApiError> {
        Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
    }

    pub fn verify_password(&self, password_to_verify: &str) -> Result<bool, ApiError> {
        Ok(bcrypt::verify(password_to_verify, &self.password)?)
    }

    pub fn token(&self) -> Result<String, ApiError> {
        let key = signing_key()?;
        issue_token(self.id, &self.email, &key)
    }

    /// Resolves a bearer token back to the stored record. The token has to
    /// carry both the id and the email of a live user; anything else is a
    /// credentials failure, not a lookup failure.
    pub fn load_from_token(jwt_token: &str, connection: &mut PgConnection) -> Result<User, ApiError> {
        use crate::db::schema::users::dsl::*;

        let key = signing_key()?;
        let claims = verify_token(jwt_token, &key)?;
        users
            .filter(id.eq(claims.sub))
            .filter(email.eq(&claims.email))
            .get_result::<User>(connection)
            .map_err(|_| ApiError::Unauthorized)
    }

    pub fn load_by_name(name: &str, connection: &mut PgConnection) -> Result<User, ApiError> {
        use crate::db::schema::users::dsl::*;
        users
            .filter(username.eq(name))
            .get_result::<User>(connection)
            .map_err(|e| e.into())
    }

    pub fn profile(&self, following: bool) -> Profile<'_> {
        Profile {
            username: Cow::Borrowed(&self.username),
            bio: self.bio.as_deref().map(Cow::Borrowed),
            image: self.image.as_deref().map(Cow::Borrowed),
            following,
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub email: String,
}
