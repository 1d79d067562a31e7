#[macro_use]
extern crate rocket;

mod article;
mod comment;
mod db;
mod profile;
mod tag;
mod types;
mod users;
mod utils;

use rocket::response::content;
use serde_json::json;

#[catch(422)]
fn unprocessable() -> content::RawJson<String> {
    let json = json!({
        "errors": [
            "unprocessable entity"
        ]
    });
    content::RawJson(json.to_string())
}

#[catch(404)]
fn not_found() -> content::RawJson<String> {
    let json = json!({
        "errors": [
            "entity not found"
        ]
    });
    content::RawJson(json.to_string())
}

#[launch]
fn rocket() -> _ {
    let pool = db::init_pool().expect("Failed to create database pool");
    rocket::build()
        .manage(pool)
        .mount("/users", routes![users::register, users::login])
        .mount("/", routes![users::current, users::update])
        .mount(
            "/",
            routes![profile::profile, profile::follow, profile::unfollow],
        )
        .mount("/", routes![tag::tags])
        .mount(
            "/articles",
            routes![
                article::list,
                article::feed,
                article::get,
                article::create,
                article::update,
                article::delete,
                article::favorite,
                article::unfavorite,
                comment::add,
                comment::get,
                comment::delete,
            ],
        )
        .register("/", catchers![not_found, unprocessable])
}
