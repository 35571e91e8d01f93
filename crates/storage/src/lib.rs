use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, SqliteConnection,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{FrameId, LayerId, ProjectId, UserId};

mod frames;
mod layers;
pub mod preview;

pub use frames::{CreatedFrame, DeletedFrame};
pub use preview::{preview_key, FsPreviewStore, PreviewStore};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredProject {
    pub project_id: ProjectId,
    pub owner_id: UserId,
    pub title: String,
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct StoredFrame {
    pub frame_id: FrameId,
    pub project_id: ProjectId,
    pub index: i64,
    pub content_json: String,
    pub preview_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLayer {
    pub layer_id: LayerId,
    pub frame_id: FrameId,
    pub order: i64,
    pub name: String,
    pub visible: bool,
    pub opacity: u8,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Partial project update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CreatedProject {
    pub project: StoredProject,
    pub frame: StoredFrame,
    pub layers: Vec<StoredLayer>,
}

const PROJECT_COLUMNS: &str =
    "id, owner_user_id, title, description, width, height, fps, created_at, updated_at";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every connection to an in-memory database would see its own empty schema.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_user(&self, username: &str) -> Result<UserId> {
        let rec = sqlx::query(
            "INSERT INTO users (username) VALUES (?)
             ON CONFLICT(username) DO UPDATE SET username=excluded.username
             RETURNING id",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(UserId(rec.get::<i64, _>(0)))
    }

    pub async fn user_exists(&self, user_id: UserId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Creates a project together with its first frame and that frame's
    /// default layer.
    pub async fn create_project(&self, owner: UserId, project: &NewProject) -> Result<CreatedProject> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            "INSERT INTO projects (owner_user_id, title, description, width, height, fps, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(owner.0)
        .bind(&project.title)
        .bind(&project.description)
        .bind(project.width)
        .bind(project.height)
        .bind(project.fps)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert project")?;
        let stored = project_from_row(&row);

        let frame = frames::insert_frame(&mut tx, stored.project_id, 1, "", None).await?;
        let layers = layers::ensure_default_layer(&mut tx, frame.frame_id).await?;

        tx.commit().await?;
        Ok(CreatedProject {
            project: stored,
            frame,
            layers,
        })
    }

    pub async fn list_projects_for_owner(&self, owner: UserId) -> Result<Vec<StoredProject>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects
             WHERE owner_user_id = ?
             ORDER BY updated_at DESC, id DESC"
        ))
        .bind(owner.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(project_from_row).collect())
    }

    /// Returns the project only when `owner` owns it.
    pub async fn project_for_owner(
        &self,
        project_id: ProjectId,
        owner: UserId,
    ) -> Result<Option<StoredProject>> {
        let row = sqlx::query(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ? AND owner_user_id = ?"
        ))
        .bind(project_id.0)
        .bind(owner.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(project_from_row))
    }

    pub async fn update_project(
        &self,
        project_id: ProjectId,
        owner: UserId,
        changes: &ProjectChanges,
    ) -> Result<Option<StoredProject>> {
        let row = sqlx::query(&format!(
            "UPDATE projects SET
                title = COALESCE(?, title),
                description = COALESCE(?, description),
                width = COALESCE(?, width),
                height = COALESCE(?, height),
                fps = COALESCE(?, fps),
                updated_at = ?
             WHERE id = ? AND owner_user_id = ?
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(changes.title.as_deref())
        .bind(changes.description.as_deref())
        .bind(changes.width)
        .bind(changes.height)
        .bind(changes.fps)
        .bind(Utc::now())
        .bind(project_id.0)
        .bind(owner.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(project_from_row))
    }

    /// Deletes the project and, by cascade, its frames and layers.
    pub async fn delete_project(&self, project_id: ProjectId, owner: UserId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM projects WHERE id = ? AND owner_user_id = ?")
            .bind(project_id.0)
            .bind(owner.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

/// True when `err` was caused by a uniqueness violation, typically two
/// concurrent reorders of the same project racing at commit.
pub fn is_conflict(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

async fn touch_project(conn: &mut SqliteConnection, project_id: ProjectId) -> Result<()> {
    sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(project_id.0)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn project_from_row(row: &SqliteRow) -> StoredProject {
    StoredProject {
        project_id: ProjectId(row.get::<i64, _>("id")),
        owner_id: UserId(row.get::<i64, _>("owner_user_id")),
        title: row.get::<String, _>("title"),
        description: row.get::<String, _>("description"),
        width: row.get::<u32, _>("width"),
        height: row.get::<u32, _>("height"),
        fps: row.get::<u32, _>("fps"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
