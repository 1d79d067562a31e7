use std::io::Cursor;

use chrono::{DateTime, SecondsFormat, Utc};
use rocket::http::{ContentType, Status};
use rocket::response::{self, Response};
use serde::Serializer;
use serde_json::Value;

pub fn json_response(json: &Value, status: Status) -> response::Result<'static> {
    let body = json.to_string();
    Response::build()
        .status(status)
        .header(ContentType::JSON)
        .sized_body(body.len(), Cursor::new(body))
        .ok()
}

pub fn serialize_date<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = date.to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_str(&s)
}
