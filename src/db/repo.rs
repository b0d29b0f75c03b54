use super::model::JobRow;
use crate::log::JobLog;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database URL: {}", normalized))?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    if !normalized.starts_with("sqlite::memory") {
        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    }
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and make sure the
/// parent directory exists. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_credential(pool: &Pool, key: &str) -> Result<Option<String>> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM credentials WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("failed to read credential {}", key))?;
    Ok(value)
}

#[instrument(skip_all)]
pub async fn set_credential(pool: &Pool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO credentials (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .with_context(|| format!("failed to write credential {}", key))?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn remove_credential(pool: &Pool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM credentials WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await
        .with_context(|| format!("failed to remove credential {}", key))?;
    Ok(())
}

/// Replace the persisted job log with `log`.
#[instrument(skip_all, fields(jobs = log.len()))]
pub async fn save_log(pool: &Pool, log: &JobLog) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM jobs").execute(&mut *tx).await?;
    for (position, job) in log.jobs().iter().enumerate() {
        let row = JobRow::from_job(position, job)?;
        sqlx::query(
            "INSERT INTO jobs (id, position, prompt, status, detail, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(row.id)
        .bind(row.position)
        .bind(&row.prompt)
        .bind(&row.status)
        .bind(&row.detail)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to persist job {}", row.id))?;
    }
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn load_log(pool: &Pool) -> Result<JobLog> {
    let rows = sqlx::query(
        "SELECT id, position, prompt, status, detail, created_at FROM jobs ORDER BY position",
    )
    .fetch_all(pool)
    .await
    .context("failed to load job log")?;

    let jobs = rows
        .into_iter()
        .map(|row| {
            JobRow {
                id: row.get("id"),
                position: row.get("position"),
                prompt: row.get("prompt"),
                status: row.get("status"),
                detail: row.get("detail"),
                created_at: row.get::<DateTime<Utc>, _>("created_at"),
            }
            .into_job()
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(JobLog::from_jobs(jobs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn file_urls_are_normalized_and_parent_created() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("imagen.db");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let normalized = prepare_sqlite_url(&url);
        assert_eq!(normalized, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(td.path().join("nested").exists());
    }
}
