use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::errors::{AppError, AppResult};

pub mod audit;
pub mod permissions;
pub mod roles;
pub mod row_parsers;
pub mod users;
pub mod versions;

pub async fn init() -> anyhow::Result<SqlitePool> {
	let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
	let options = SqliteConnectOptions::from_str(&database_url)
		.context("invalid DATABASE_URL")?
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(10)
		.min_connections(1)
		.acquire_timeout(Duration::from_secs(10))
		.connect_with(options)
		.await
		.context("failed to connect to database")?;

	sqlx::migrate!()
		.run(&pool)
		.await
		.context("failed to run migrations")?;

	Ok(pool)
}

/// Result of a lookup by a set of names: whatever matched, plus the names
/// that did not. A non-empty `missing` is a warning, not an error; callers
/// that need every name use [`Partial::into_complete`].
#[derive(Debug, Clone)]
pub struct Partial<T> {
	pub found: Vec<T>,
	pub missing: Vec<String>,
}

impl<T> Partial<T> {
	pub fn is_complete(&self) -> bool {
		self.missing.is_empty()
	}

	pub fn into_complete(self, what: &str) -> AppResult<Vec<T>> {
		if self.missing.is_empty() {
			Ok(self.found)
		} else {
			Err(AppError::not_found(format!("{} not found: {}", what, self.missing.join(", "))))
		}
	}
}

/// Splits `requested` into found and missing given the names that matched.
pub(crate) fn partition<T>(requested: &[String], found: Vec<T>, name_of: impl Fn(&T) -> &str) -> Partial<T> {
	let missing = requested
		.iter()
		.filter(|name| !found.iter().any(|item| name_of(item) == name.as_str()))
		.cloned()
		.collect::<std::collections::BTreeSet<_>>()
		.into_iter()
		.collect();
	Partial { found, missing }
}
