use anyhow::Context;
use diesel_async::{pooled_connection::deadpool::Pool, AsyncPgConnection};

pub type DbPool = Pool<AsyncPgConnection>;

pub fn establish_connection_pool(dsn: &str) -> anyhow::Result<DbPool> {
    let config =
        diesel_async::pooled_connection::AsyncDieselConnectionManager::<AsyncPgConnection>::new(
            dsn,
        );
    let pool = Pool::builder(config)
        .build()
        .context("failed to build database pool")?;

    Ok(pool)
}
