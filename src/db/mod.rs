use std::env;
use std::ops::{Deref, DerefMut};

use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use dotenv::dotenv;
use error_chain::error_chain;
use rocket::http::Status;
use rocket::request::{self, FromRequest, Outcome, Request};
use rocket::State;

pub mod schema;

// An alias to the type for a pool of Diesel Postgres connections.
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub struct DbConnection(pub r2d2::PooledConnection<ConnectionManager<PgConnection>>);

error_chain! {
    foreign_links {
        Var(::std::env::VarError);
        R2D2(::r2d2::Error);
    }
}

/// Attempts to retrieve a single connection from the managed database pool. If
/// no pool is currently managed, fails with an `InternalServerError` status. If
/// no connections are available, fails with a `ServiceUnavailable` status.
#[rocket::async_trait]
impl<'r> FromRequest<'r> for DbConnection {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> request::Outcome<DbConnection, ()> {
        match request.guard::<&State<Pool>>().await {
            Outcome::Success(pool) => match pool.get() {
                Ok(conn) => Outcome::Success(DbConnection(conn)),
                Err(_) => Outcome::Error((Status::ServiceUnavailable, ())),
            },
            _ => Outcome::Error((Status::InternalServerError, ())),
        }
    }
}

// For the convenience of using a &mut DbConnection as a &mut PgConnection.
impl Deref for DbConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DbConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

pub fn init_pool() -> Result<Pool> {
    dotenv().ok();
    let database_url = env::var("DATABASE_URL")?;
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::new(manager)?;
    log::info!("database pool initialized");
    Ok(pool)
}
