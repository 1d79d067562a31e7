use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::{insert_into, select, update as diesel_update};
use log::info;
use rocket::http::Status;
use rocket::request::{self, FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::schema::users;
use crate::db::DbConnection;
use crate::types::{ApiError, ApiResult, Validate, ValidationError};

pub mod models;
mod utils;

use self::utils::*;

pub type CurrentUser = Result<models::User, ApiError>;

#[derive(Debug, Deserialize)]
struct RegistrationDetails {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub struct Registration {
    user: RegistrationDetails,
}

impl Validate for Registration {
    type Error = ApiError;
    fn validate(self, _connection: &mut PgConnection) -> Result<Self, Self::Error> {
        let mut errors = ValidationError::default();

        if let Err(e) = validate_email_re(&self.user.email) {
            errors.merge(e);
        }
        if let Err(e) = validate_username_re(&self.user.username) {
            errors.merge(e);
        }
        if let Err(e) = validate_password(&self.user.password) {
            errors.merge(e);
        }

        if errors.empty() {
            Ok(self)
        } else {
            Err(errors.into())
        }
    }
}

/// The public user shape returned by register and login: profile fields plus
/// a fresh session token, never the password hash.
#[derive(Debug, Serialize)]
pub struct UserView {
    email: String,
    token: String,
    username: String,
    bio: Option<String>,
    image: Option<String>,
}

impl UserView {
    fn from_user(user: models::User, token: String) -> Self {
        UserView {
            email: user.email,
            token,
            username: user.username,
            bio: user.bio,
            image: user.image,
        }
    }
}

#[post("/", format = "json", data = "<registration>")]
pub fn register(mut connection: DbConnection, registration: Json<Registration>) -> ApiResult<Value> {
    use crate::db::schema::users::dsl::*;

    let registration = registration.validate(&mut connection)?.into_inner();

    let email_exists = select(exists(users.filter(email.eq(&registration.user.email))))
        .get_result::<bool>(&mut *connection)?;
    if email_exists {
        return Err(ApiError::Conflict("email is taken"));
    }

    let username_exists = select(exists(users.filter(username.eq(&registration.user.username))))
        .get_result::<bool>(&mut *connection)?;
    if username_exists {
        return Err(ApiError::Conflict("username is taken"));
    }

    let new_user = models::NewUser {
        username: registration.user.username,
        email: registration.user.email,
        password: models::User::make_password(&registration.user.password)?,
    };

    let user = insert_into(users)
        .values(&new_user)
        .get_result::<models::User>(&mut *connection)?;
    info!("registered user {}", user.username);

    let token = user.token()?;
    Ok(Json(json!({ "user": UserView::from_user(user, token) })))
}

#[derive(Debug, Deserialize)]
struct LoginDetails {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    user: LoginDetails,
}

#[post("/login", format = "json", data = "<login>")]
pub fn login(mut connection: DbConnection, login: Json<Login>) -> ApiResult<Value> {
    use crate::db::schema::users::dsl::*;

    let user = users
        .filter(email.eq(&login.user.email))
        .first::<models::User>(&mut *connection)?;
    if !user.verify_password(&login.user.password)? {
        return Err(ApiError::Unauthorized);
    }

    let token = user.token()?;
    Ok(Json(json!({ "user": UserView::from_user(user, token) })))
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for models::User {
    type Error = ApiError;

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let token_header = match request.headers().get_one("Authorization") {
            Some(header) => header,
            None => return Outcome::Error((Status::Unauthorized, ApiError::Unauthorized)),
        };
        // Clients send either scheme; the payload is the same JWT.
        let token = token_header
            .strip_prefix("Bearer ")
            .or_else(|| token_header.strip_prefix("Token "))
            .unwrap_or(token_header);

        match request.guard::<DbConnection>().await {
            Outcome::Success(mut connection) => {
                match models::User::load_from_token(token, &mut connection) {
                    Ok(user) => Outcome::Success(user),
                    Err(e) => Outcome::Error((Status::Unauthorized, e)),
                }
            }
            _ => Outcome::Error((Status::ServiceUnavailable, ApiError::Internal)),
        }
    }
}

#[get("/user", format = "json")]
pub fn current(user: CurrentUser) -> ApiResult<Value> {
    let user = json!({ "user": user? });
    Ok(Json(user))
}

#[derive(Debug, Deserialize, AsChangeset)]
#[diesel(table_name = users)]
pub struct UpdateUser {
    pub username: Option<String>,
    pub email: Option<String>,
    pub image: Option<String>,
    pub bio: Option<String>,
}

impl UpdateUser {
    fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.image.is_none() && self.bio.is_none()
    }
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub user: UpdateUser,
}

#[put("/user", format = "json", data = "<update>")]
pub fn update(
    current_user: CurrentUser,
    mut connection: DbConnection,
    update: Json<Update>,
) -> ApiResult<Value> {
    use crate::db::schema::users::dsl::*;

    let user = current_user?;
    let update = update.into_inner();
    let mut error = ValidationError::default();

    if let Some(ref new_email) = update.user.email {
        if let Err(e) = validate_email_re(new_email) {
            error.merge(e);
        } else {
            let expr = users.filter(email.eq(new_email)).filter(id.ne(user.id));
            let email_exists = select(exists(expr)).get_result::<bool>(&mut *connection)?;
            if email_exists {
                return Err(ApiError::Conflict("email or username taken"));
            }
        }
    }

    if let Some(ref new_username) = update.user.username {
        if let Err(e) = validate_username_re(new_username) {
            error.merge(e);
        } else {
            let expr = users.filter(username.eq(new_username)).filter(id.ne(user.id));
            let username_exists = select(exists(expr)).get_result::<bool>(&mut *connection)?;
            if username_exists {
                return Err(ApiError::Conflict("email or username taken"));
            }
        }
    }

    if !error.empty() {
        return Err(error.into());
    }

    if update.user.is_empty() {
        return Ok(Json(json!({ "user": user })));
    }

    let user = diesel_update(users.filter(id.eq(user.id)))
        .set(&update.user)
        .get_result::<models::User>(&mut *connection)?;
    Ok(Json(json!({ "user": user })))
}
