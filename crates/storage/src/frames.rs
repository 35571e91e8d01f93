use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sequencer::{frames as sequence, RenumberPlan, Slot};
use shared::domain::{FrameId, ProjectId};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{layers, touch_project, Storage, StoredFrame, StoredLayer};

const FRAME_COLUMNS: &str =
    "id, project_id, frame_index, content_json, preview_key, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct CreatedFrame {
    pub frame: StoredFrame,
    pub layers: Vec<StoredLayer>,
    pub frames: Vec<StoredFrame>,
}

#[derive(Debug, Clone)]
pub struct DeletedFrame {
    /// Remaining frames, densely indexed.
    pub frames: Vec<StoredFrame>,
    pub active_index: i64,
}

impl Storage {
    pub async fn list_frames(&self, project_id: ProjectId) -> Result<Vec<StoredFrame>> {
        let mut conn = self.pool.acquire().await?;
        frames_in_order(&mut conn, project_id).await
    }

    pub async fn frame_by_index(
        &self,
        project_id: ProjectId,
        index: i64,
    ) -> Result<Option<StoredFrame>> {
        let mut conn = self.pool.acquire().await?;
        frame_by_index(&mut conn, project_id, index).await
    }

    /// Appends a frame after the current last index. When `duplicate_from`
    /// names an existing index, its content, preview and layers are cloned;
    /// otherwise the frame starts empty with a default layer.
    pub async fn create_frame(
        &self,
        project_id: ProjectId,
        duplicate_from: Option<i64>,
    ) -> Result<CreatedFrame> {
        let mut tx = self.pool.begin().await?;

        let max_index: Option<i64> =
            sqlx::query_scalar("SELECT MAX(frame_index) FROM frames WHERE project_id = ?")
                .bind(project_id.0)
                .fetch_one(&mut *tx)
                .await?;
        let index = sequence::next_index(max_index);

        let source = match duplicate_from {
            Some(source_index) => frame_by_index(&mut tx, project_id, source_index).await?,
            None => None,
        };

        let frame = match &source {
            Some(source) => {
                let frame = insert_frame(
                    &mut tx,
                    project_id,
                    index,
                    &source.content_json,
                    source.preview_key.as_deref(),
                )
                .await?;
                layers::copy_layers(&mut tx, source.frame_id, frame.frame_id).await?;
                frame
            }
            None => insert_frame(&mut tx, project_id, index, "", None).await?,
        };
        let layers = layers::ensure_default_layer(&mut tx, frame.frame_id).await?;

        touch_project(&mut tx, project_id).await?;
        let frames = frames_in_order(&mut tx, project_id).await?;
        tx.commit().await?;

        Ok(CreatedFrame {
            frame,
            layers,
            frames,
        })
    }

    /// Removes the frame at `index` and closes the gap. A project is never
    /// left without frames: deleting the last one recreates a blank frame 1.
    pub async fn delete_frame(
        &self,
        project_id: ProjectId,
        index: i64,
    ) -> Result<Option<DeletedFrame>> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM frames WHERE project_id = ? AND frame_index = ?")
            .bind(project_id.0)
            .bind(index)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Ok(None);
        }

        let remaining = frames_in_order(&mut tx, project_id).await?;
        if remaining.is_empty() {
            let frame = insert_frame(&mut tx, project_id, 1, "", None).await?;
            layers::ensure_default_layer(&mut tx, frame.frame_id).await?;
        } else {
            let plan = sequence::plan_compaction(&slots(&remaining));
            apply_plan(&mut tx, &plan).await?;
        }

        touch_project(&mut tx, project_id).await?;
        let frames = frames_in_order(&mut tx, project_id).await?;
        tx.commit().await?;

        let active_index = sequence::active_index_after_delete(index, frames.len());
        Ok(Some(DeletedFrame {
            frames,
            active_index,
        }))
    }

    /// Renumbers the project's frames to follow `requested`. Unknown ids are
    /// ignored and unmentioned frames keep their relative order at the end.
    pub async fn reorder_frames(
        &self,
        project_id: ProjectId,
        requested: &[FrameId],
    ) -> Result<Vec<StoredFrame>> {
        let mut tx = self.pool.begin().await?;

        let current = frames_in_order(&mut tx, project_id).await?;
        let plan = sequence::plan_reorder(&slots(&current), requested);
        if plan.is_noop() {
            return Ok(current);
        }

        apply_plan(&mut tx, &plan).await?;
        touch_project(&mut tx, project_id).await?;
        let frames = frames_in_order(&mut tx, project_id).await?;
        tx.commit().await?;
        Ok(frames)
    }

    /// Compacts indices without changing order; returns how many frames moved.
    pub async fn compact_frames(&self, project_id: ProjectId) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        let current = frames_in_order(&mut tx, project_id).await?;
        let plan = sequence::plan_compaction(&slots(&current));
        if plan.is_noop() {
            return Ok(0);
        }

        apply_plan(&mut tx, &plan).await?;
        touch_project(&mut tx, project_id).await?;
        tx.commit().await?;
        Ok(plan.settle.len())
    }

    /// Updates the frame's content and/or preview; `None` keeps the stored value.
    pub async fn save_frame(
        &self,
        project_id: ProjectId,
        index: i64,
        content_json: Option<&str>,
        preview_key: Option<&str>,
    ) -> Result<Option<StoredFrame>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE frames SET
                content_json = COALESCE(?, content_json),
                preview_key = COALESCE(?, preview_key),
                updated_at = ?
             WHERE project_id = ? AND frame_index = ?
             RETURNING {FRAME_COLUMNS}"
        ))
        .bind(content_json)
        .bind(preview_key)
        .bind(Utc::now())
        .bind(project_id.0)
        .bind(index)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        touch_project(&mut tx, project_id).await?;
        tx.commit().await?;
        Ok(Some(frame_from_row(&row)))
    }
}

pub(crate) async fn insert_frame(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
    index: i64,
    content_json: &str,
    preview_key: Option<&str>,
) -> Result<StoredFrame> {
    let now = Utc::now();
    let row = sqlx::query(&format!(
        "INSERT INTO frames (project_id, frame_index, content_json, preview_key, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING {FRAME_COLUMNS}"
    ))
    .bind(project_id.0)
    .bind(index)
    .bind(content_json)
    .bind(preview_key)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to insert frame {index} of project {}", project_id.0))?;
    Ok(frame_from_row(&row))
}

async fn frames_in_order(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
) -> Result<Vec<StoredFrame>> {
    let rows = sqlx::query(&format!(
        "SELECT {FRAME_COLUMNS} FROM frames WHERE project_id = ? ORDER BY frame_index ASC"
    ))
    .bind(project_id.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(frame_from_row).collect())
}

async fn frame_by_index(
    conn: &mut SqliteConnection,
    project_id: ProjectId,
    index: i64,
) -> Result<Option<StoredFrame>> {
    let row = sqlx::query(&format!(
        "SELECT {FRAME_COLUMNS} FROM frames WHERE project_id = ? AND frame_index = ?"
    ))
    .bind(project_id.0)
    .bind(index)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.as_ref().map(frame_from_row))
}

/// Writes the staging phase in full, then the settle phase. Callers run this
/// inside the transaction that also holds their reads.
async fn apply_plan(conn: &mut SqliteConnection, plan: &RenumberPlan<FrameId>) -> Result<()> {
    for phase in [&plan.staging, &plan.settle] {
        for assignment in phase {
            sqlx::query("UPDATE frames SET frame_index = ? WHERE id = ?")
                .bind(assignment.position)
                .bind(assignment.id.0)
                .execute(&mut *conn)
                .await
                .with_context(|| {
                    format!(
                        "failed to move frame {} to index {}",
                        assignment.id.0, assignment.position
                    )
                })?;
        }
    }
    Ok(())
}

fn slots(frames: &[StoredFrame]) -> Vec<Slot<FrameId>> {
    frames
        .iter()
        .map(|frame| Slot::new(frame.frame_id, frame.index))
        .collect()
}

fn frame_from_row(row: &SqliteRow) -> StoredFrame {
    StoredFrame {
        frame_id: FrameId(row.get::<i64, _>("id")),
        project_id: ProjectId(row.get::<i64, _>("project_id")),
        index: row.get::<i64, _>("frame_index"),
        content_json: row.get::<String, _>("content_json"),
        preview_key: row.get::<Option<String>, _>("preview_key"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
        updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
    }
}
