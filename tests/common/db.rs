//! Throwaway Postgres databases for tests that need real SQL.
//!
//! Each `ScratchDb` is a fresh database created next to `DATABASE_URL`
//! with `sql/001_atlas.sql` loaded. Without `DATABASE_URL` the tests skip.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

const SCHEMA: &str = include_str!("../../sql/001_atlas.sql");

pub struct ScratchDb {
    pub pool: PgPool,
    admin_url: String,
    name: String,
}

impl ScratchDb {
    /// `None` when `DATABASE_URL` is unset
    pub async fn create() -> Result<Option<Self>> {
        let Some(admin_url) = std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()) else {
            eprintln!("DATABASE_URL not set; skipping database test");
            return Ok(None);
        };
        let name = format!("atlas_test_{}", Uuid::new_v4().simple());

        let mut admin = PgConnection::connect(&admin_url).await.context("connecting to DATABASE_URL")?;
        admin
            .execute(format!("CREATE DATABASE \"{}\"", name).as_str())
            .await
            .with_context(|| format!("creating {}", name))?;
        admin.close().await?;

        let mut url = url::Url::parse(&admin_url).context("parsing DATABASE_URL")?;
        url.set_path(&format!("/{}", name));
        let pool = PgPoolOptions::new().max_connections(4).connect(url.as_str()).await?;
        pool.execute(SCHEMA).await.context("loading sql/001_atlas.sql")?;

        Ok(Some(Self { pool, admin_url, name }))
    }

    pub async fn drop(self) -> Result<()> {
        self.pool.close().await;
        let mut admin = PgConnection::connect(&self.admin_url).await?;
        admin
            .execute(format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name).as_str())
            .await?;
        admin.close().await?;
        Ok(())
    }

    pub async fn staff(&self, email: &str) -> Result<Uuid> {
        Ok(sqlx::query_scalar(
            "INSERT INTO ops.staff (email, display_name, role, password_hash) \
             VALUES ($1, $1, 'staff', 'not-a-bcrypt-hash') RETURNING id",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn person(&self, key: &str, first_name: &str) -> Result<Uuid> {
        Ok(sqlx::query_scalar("INSERT INTO sot.people (person_key, first_name) VALUES ($1, $2) RETURNING id")
            .bind(key)
            .bind(first_name)
            .fetch_one(&self.pool)
            .await?)
    }
}
