use std::collections::HashMap;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::PgConnection;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use serde::Serialize;
use serde_json::json;

use crate::utils::json_response;

pub trait Validate
where
    Self: Sized,
{
    type Error;
    fn validate(self, connection: &mut PgConnection) -> Result<Self, Self::Error>;
}

#[derive(Debug)]
pub enum ApiError {
    Diesel(DieselError),
    Validation(ValidationError),
    Conflict(&'static str),
    BadRequest(&'static str),
    NotFound,
    Unauthorized,
    Internal,
}

impl From<DieselError> for ApiError {
    fn from(err: DieselError) -> ApiError {
        ApiError::Diesel(err)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> ApiError {
        ApiError::Validation(err)
    }
}

impl From<bcrypt::BcryptError> for ApiError {
    fn from(_: bcrypt::BcryptError) -> ApiError {
        ApiError::Internal
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Default)]
pub struct ValidationError(HashMap<String, Vec<String>>);

impl ValidationError {
    pub fn add_error<K: Into<String>, V: Into<String>>(&mut self, key: K, val: V) {
        let entry = self.0.entry(key.into()).or_default();
        entry.push(val.into());
    }

    pub fn from<K: Into<String>, V: Into<String>>(key: K, val: V) -> Self {
        let mut error = ValidationError::default();
        error.add_error(key, val);
        error
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn merge(&mut self, other: ValidationError) {
        for (key, errors) in other.0.into_iter() {
            let entry = self.0.entry(key).or_default();
            entry.extend(errors);
        }
    }

    pub fn empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'static> {
        match self {
            ApiError::Diesel(error) => match error {
                DieselError::NotFound => Err(Status::NotFound),
                // A mutation lost the race against a unique index; the
                // pre-checks already passed, so surface it as the store-level
                // validation failure it is.
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    json_response(&json!({ "errors": { "message": ["bad request"] } }), Status::BadRequest)
                }
                _ => Err(Status::InternalServerError),
            },

            ApiError::Validation(error) => {
                json_response(&json!({ "errors": error }), Status::UnprocessableEntity)
            }

            ApiError::Conflict(message) => {
                json_response(&json!({ "errors": { "message": [message] } }), Status::Conflict)
            }

            ApiError::BadRequest(message) => {
                json_response(&json!({ "errors": { "message": [message] } }), Status::BadRequest)
            }

            // The 404 catcher renders the body.
            ApiError::NotFound => Err(Status::NotFound),

            ApiError::Unauthorized => json_response(
                &json!({ "errors": { "status": "401 Unauthorized" } }),
                Status::Unauthorized,
            ),

            ApiError::Internal => Err(Status::InternalServerError),
        }
    }
}

impl<T> Validate for Json<T>
where
    T: Validate,
{
    type Error = <T as Validate>::Error;
    fn validate(self, connection: &mut PgConnection) -> Result<Self, Self::Error> {
        let inner = self.into_inner();
        let validated = inner.validate(connection)?;
        Ok(Json(validated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::local::blocking::Client;

    #[test]
    fn validation_error_collects_per_field() {
        let mut error = ValidationError::default();
        error.add_error("email", "invalid email");
        error.add_error("email", "email is taken");
        error.add_error("password", "password too short");
        assert_eq!(error.len(), 2);

        let as_json = serde_json::to_value(&error).unwrap();
        assert_eq!(
            as_json["email"],
            json!(["invalid email", "email is taken"])
        );
        assert_eq!(as_json["password"], json!(["password too short"]));
    }

    #[test]
    fn validation_error_merge_extends_existing_keys() {
        let mut left = ValidationError::from("email", "invalid email");
        let right = ValidationError::from("email", "email is taken");
        left.merge(right);

        let as_json = serde_json::to_value(&left).unwrap();
        assert_eq!(as_json["email"], json!(["invalid email", "email is taken"]));
    }

    #[get("/not-found")]
    fn not_found_route() -> ApiResult<()> {
        Err(ApiError::NotFound)
    }

    #[get("/conflict")]
    fn conflict_route() -> ApiResult<()> {
        Err(ApiError::Conflict("email is taken"))
    }

    #[get("/unauthorized")]
    fn unauthorized_route() -> ApiResult<()> {
        Err(ApiError::Unauthorized)
    }

    #[get("/invalid")]
    fn invalid_route() -> ApiResult<()> {
        Err(ApiError::Validation(ValidationError::from(
            "password",
            "password too short",
        )))
    }

    fn client() -> Client {
        let rocket = rocket::build().mount(
            "/",
            routes![not_found_route, conflict_route, unauthorized_route, invalid_route],
        );
        Client::tracked(rocket).unwrap()
    }

    #[test]
    fn errors_map_to_the_documented_statuses() {
        let client = client();
        assert_eq!(client.get("/not-found").dispatch().status(), Status::NotFound);
        assert_eq!(client.get("/conflict").dispatch().status(), Status::Conflict);
        assert_eq!(
            client.get("/unauthorized").dispatch().status(),
            Status::Unauthorized
        );
        assert_eq!(
            client.get("/invalid").dispatch().status(),
            Status::UnprocessableEntity
        );
    }

    #[test]
    fn conflict_body_carries_the_message() {
        let client = client();
        let response = client.get("/conflict").dispatch();
        let body: serde_json::Value = response.into_json().unwrap();
        assert_eq!(body["errors"]["message"], json!(["email is taken"]));
    }
}
