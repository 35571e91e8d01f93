use anyhow::{Context, Result};
use sequencer::{
    layers::{self as stack, LayerPatch, NewLayer},
    RenumberPlan, Slot,
};
use shared::domain::{FrameId, LayerId};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use crate::{Storage, StoredLayer};

const LAYER_COLUMNS: &str = "id, frame_id, layer_order, name, visible, opacity";

// Every public operation here starts by repairing the "at least one layer"
// invariant for the frame it touches.
impl Storage {
    /// Layers of `frame_id`, front-most first.
    pub async fn list_layers(&self, frame_id: FrameId) -> Result<Vec<StoredLayer>> {
        let mut tx = self.pool.begin().await?;
        let layers = ensure_default_layer(&mut tx, frame_id).await?;
        tx.commit().await?;
        Ok(layers)
    }

    /// Adds a layer in front of all existing ones. A blank or missing name
    /// falls back to `Layer <n>`.
    pub async fn create_layer(&self, frame_id: FrameId, name: Option<&str>) -> Result<StoredLayer> {
        let mut tx = self.pool.begin().await?;

        let existing = ensure_default_layer(&mut tx, frame_id).await?;
        let name = name
            .and_then(stack::normalize_name)
            .unwrap_or_else(|| stack::fallback_name(existing.len() + 1));
        let layer = insert_layer(
            &mut tx,
            frame_id,
            &NewLayer {
                name,
                order: stack::next_order(existing.iter().map(|layer| layer.order)),
                visible: true,
                opacity: stack::MAX_OPACITY,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(layer)
    }

    /// Applies the fields present in `patch`. Returns `None` when the layer
    /// does not belong to `frame_id`.
    pub async fn update_layer(
        &self,
        frame_id: FrameId,
        layer_id: LayerId,
        patch: &LayerPatch,
    ) -> Result<Option<StoredLayer>> {
        let mut tx = self.pool.begin().await?;
        ensure_default_layer(&mut tx, frame_id).await?;

        let row = if patch.is_empty() {
            sqlx::query(&format!(
                "SELECT {LAYER_COLUMNS} FROM layers WHERE id = ? AND frame_id = ?"
            ))
            .bind(layer_id.0)
            .bind(frame_id.0)
            .fetch_optional(&mut *tx)
            .await?
        } else {
            sqlx::query(&format!(
                "UPDATE layers SET
                    name = COALESCE(?, name),
                    visible = COALESCE(?, visible),
                    opacity = COALESCE(?, opacity)
                 WHERE id = ? AND frame_id = ?
                 RETURNING {LAYER_COLUMNS}"
            ))
            .bind(patch.name.as_deref())
            .bind(patch.visible)
            .bind(patch.opacity)
            .bind(layer_id.0)
            .bind(frame_id.0)
            .fetch_optional(&mut *tx)
            .await?
        };

        tx.commit().await?;
        Ok(row.as_ref().map(layer_from_row))
    }

    /// Deletes a layer, recreating the default one if the frame is left
    /// empty, and compacts the remaining orders into `1..=N`.
    pub async fn delete_layer(
        &self,
        frame_id: FrameId,
        layer_id: LayerId,
    ) -> Result<Option<Vec<StoredLayer>>> {
        let mut tx = self.pool.begin().await?;
        ensure_default_layer(&mut tx, frame_id).await?;

        let deleted = sqlx::query("DELETE FROM layers WHERE id = ? AND frame_id = ?")
            .bind(layer_id.0)
            .bind(frame_id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            tx.commit().await?;
            return Ok(None);
        }

        let remaining = ensure_default_layer(&mut tx, frame_id).await?;
        let plan = stack::plan_compaction(&slots(&remaining));
        apply_plan(&mut tx, &plan).await?;

        let layers = layers_front_first(&mut tx, frame_id).await?;
        tx.commit().await?;
        Ok(Some(layers))
    }

    /// Restacks layers from a front-most-first id list.
    pub async fn reorder_layers(
        &self,
        frame_id: FrameId,
        requested: &[LayerId],
    ) -> Result<Vec<StoredLayer>> {
        let mut tx = self.pool.begin().await?;

        let current = ensure_default_layer(&mut tx, frame_id).await?;
        let plan = stack::plan_reorder(&slots(&current), requested);
        if plan.is_noop() {
            tx.commit().await?;
            return Ok(current);
        }

        apply_plan(&mut tx, &plan).await?;
        let layers = layers_front_first(&mut tx, frame_id).await?;
        tx.commit().await?;
        Ok(layers)
    }
}

/// Inserts the default layer when the frame has none and returns the
/// frame's layers, front-most first.
pub(crate) async fn ensure_default_layer(
    conn: &mut SqliteConnection,
    frame_id: FrameId,
) -> Result<Vec<StoredLayer>> {
    let layers = layers_front_first(conn, frame_id).await?;
    match stack::ensure_default(&layers) {
        Some(background) => Ok(vec![insert_layer(conn, frame_id, &background).await?]),
        None => Ok(layers),
    }
}

pub(crate) async fn copy_layers(
    conn: &mut SqliteConnection,
    source: FrameId,
    target: FrameId,
) -> Result<u64> {
    let copied = sqlx::query(
        "INSERT INTO layers (frame_id, layer_order, name, visible, opacity)
         SELECT ?, layer_order, name, visible, opacity
         FROM layers WHERE frame_id = ?
         ORDER BY layer_order ASC, id ASC",
    )
    .bind(target.0)
    .bind(source.0)
    .execute(&mut *conn)
    .await
    .context("failed to copy layers")?
    .rows_affected();
    Ok(copied)
}

async fn insert_layer(
    conn: &mut SqliteConnection,
    frame_id: FrameId,
    layer: &NewLayer,
) -> Result<StoredLayer> {
    let row = sqlx::query(&format!(
        "INSERT INTO layers (frame_id, layer_order, name, visible, opacity)
         VALUES (?, ?, ?, ?, ?)
         RETURNING {LAYER_COLUMNS}"
    ))
    .bind(frame_id.0)
    .bind(layer.order)
    .bind(&layer.name)
    .bind(layer.visible)
    .bind(layer.opacity)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to insert layer into frame {}", frame_id.0))?;
    Ok(layer_from_row(&row))
}

async fn layers_front_first(
    conn: &mut SqliteConnection,
    frame_id: FrameId,
) -> Result<Vec<StoredLayer>> {
    let rows = sqlx::query(&format!(
        "SELECT {LAYER_COLUMNS} FROM layers
         WHERE frame_id = ?
         ORDER BY layer_order DESC, id DESC"
    ))
    .bind(frame_id.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.iter().map(layer_from_row).collect())
}

async fn apply_plan(conn: &mut SqliteConnection, plan: &RenumberPlan<LayerId>) -> Result<()> {
    for phase in [&plan.staging, &plan.settle] {
        for assignment in phase {
            sqlx::query("UPDATE layers SET layer_order = ? WHERE id = ?")
                .bind(assignment.position)
                .bind(assignment.id.0)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

fn slots(layers: &[StoredLayer]) -> Vec<Slot<LayerId>> {
    layers
        .iter()
        .map(|layer| Slot::new(layer.layer_id, layer.order))
        .collect()
}

fn layer_from_row(row: &SqliteRow) -> StoredLayer {
    StoredLayer {
        layer_id: LayerId(row.get::<i64, _>("id")),
        frame_id: FrameId(row.get::<i64, _>("frame_id")),
        order: row.get::<i64, _>("layer_order"),
        name: row.get::<String, _>("name"),
        visible: row.get::<bool, _>("visible"),
        opacity: row.get::<u8, _>("opacity"),
    }
}
