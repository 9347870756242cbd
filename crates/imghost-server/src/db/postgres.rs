//! Postgres-backed metadata store
//!
//! Tables come from `migrations/`: `images` holds one row per image with its blob keys,
//! `image_tags` holds the ordered tag list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use imghost_common::types::{ImagePaths, Orientation};
use sqlx::{PgExecutor, PgPool};
use tracing::instrument;
use uuid::Uuid;

use super::{
    ExpiryChange, ImagePage, ImageQuery, ImageRecord, ImageUpdate, MetadataStore, StoreError,
    TagCount,
};

const IMAGE_COLUMNS: &str = r#"
    i.id, i.original_name, i.original_key, i.webp_key, i.avif_key, i.orientation,
    i.width, i.height, i.format, i.size_bytes, i.expiry_time, i.created_at,
    COALESCE(
        (SELECT array_agg(t.tag ORDER BY t.position) FROM image_tags t WHERE t.image_id = i.id),
        ARRAY[]::text[]
    ) AS tags
"#;

const LIVE: &str = "(i.expiry_time IS NULL OR i.expiry_time > NOW())";

const LIST_FILTER: &str = r#"
    ($1::text IS NULL OR EXISTS (
        SELECT 1 FROM image_tags f WHERE f.image_id = i.id AND f.tag = $1
    ))
    AND ($2::text IS NULL OR i.orientation = $2)
"#;

#[derive(Debug, sqlx::FromRow)]
struct ImageRow {
    id: Uuid,
    original_name: String,
    original_key: String,
    webp_key: Option<String>,
    avif_key: Option<String>,
    orientation: String,
    width: i32,
    height: i32,
    format: String,
    size_bytes: i64,
    expiry_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    tags: Vec<String>,
}

impl TryFrom<ImageRow> for ImageRecord {
    type Error = StoreError;

    fn try_from(row: ImageRow) -> Result<Self, Self::Error> {
        let orientation: Orientation = row
            .orientation
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("image {}: {}", row.id, e)))?;

        Ok(ImageRecord {
            id: row.id,
            original_name: row.original_name,
            paths: ImagePaths {
                original: row.original_key,
                webp: row.webp_key,
                avif: row.avif_key,
            },
            tags: row.tags,
            orientation,
            width: u32::try_from(row.width).unwrap_or(0),
            height: u32::try_from(row.height).unwrap_or(0),
            format: row.format,
            size_bytes: u64::try_from(row.size_bytes).unwrap_or(0),
            expiry_time: row.expiry_time,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TagRow {
    name: String,
    count: i64,
}

/// Metadata store over the shared Postgres pool
#[derive(Clone)]
pub struct PgMetadataStore {
    pool: PgPool,
}

impl PgMetadataStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn fetch_image<'e, E>(executor: E, id: Uuid) -> Result<Option<ImageRecord>, StoreError>
where
    E: PgExecutor<'e>,
{
    let sql = format!("SELECT {IMAGE_COLUMNS} FROM images i WHERE i.id = $1 AND {LIVE}");
    let row = sqlx::query_as::<_, ImageRow>(&sql)
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.map(ImageRecord::try_from).transpose()
}

async fn replace_tags<'e, E>(executor: E, id: Uuid, tags: &[String]) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO image_tags (image_id, tag, position)
        SELECT $1, u.tag, u.ord::int
        FROM UNNEST($2::text[]) WITH ORDINALITY AS u(tag, ord)
        "#,
    )
    .bind(id)
    .bind(tags)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    #[instrument(skip(self))]
    async fn get_images(&self, query: &ImageQuery) -> Result<ImagePage, StoreError> {
        let orientation = query.orientation.map(|o| o.as_str());

        let sql = format!(
            "SELECT {IMAGE_COLUMNS} FROM images i WHERE {LIVE} AND {LIST_FILTER} \
             ORDER BY i.created_at DESC, i.id LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query_as::<_, ImageRow>(&sql)
            .bind(query.tag.as_deref())
            .bind(orientation)
            .bind(i64::from(query.limit))
            .bind(i64::try_from(query.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        let count_sql = format!("SELECT COUNT(*) FROM images i WHERE {LIVE} AND {LIST_FILTER}");
        let total: i64 = sqlx::query_scalar(&count_sql)
            .bind(query.tag.as_deref())
            .bind(orientation)
            .fetch_one(&self.pool)
            .await?;

        let images = rows
            .into_iter()
            .map(ImageRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ImagePage {
            images,
            total: u64::try_from(total).unwrap_or(0),
        })
    }

    #[instrument(skip(self))]
    async fn get_image(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError> {
        fetch_image(&self.pool, id).await
    }

    #[instrument(skip(self, record), fields(image_id = %record.id))]
    async fn create_image(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO images (
                id, original_name, original_key, webp_key, avif_key, orientation,
                width, height, format, size_bytes, expiry_time, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(&record.original_name)
        .bind(&record.paths.original)
        .bind(record.paths.webp.as_deref())
        .bind(record.paths.avif.as_deref())
        .bind(record.orientation.as_str())
        .bind(i32::try_from(record.width).unwrap_or(i32::MAX))
        .bind(i32::try_from(record.height).unwrap_or(i32::MAX))
        .bind(&record.format)
        .bind(i64::try_from(record.size_bytes).unwrap_or(i64::MAX))
        .bind(record.expiry_time)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(ref db_err)) = inserted {
            if db_err.is_unique_violation() {
                return Err(StoreError::Duplicate(record.id));
            }
        }
        inserted?;

        replace_tags(&mut *tx, record.id, &record.tags).await?;
        tx.commit().await?;

        Ok(record.clone())
    }

    #[instrument(skip(self))]
    async fn update_image(
        &self,
        id: Uuid,
        update: &ImageUpdate,
    ) -> Result<Option<ImageRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<Uuid> = sqlx::query_scalar(&format!(
            "SELECT i.id FROM images i WHERE i.id = $1 AND {LIVE} FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            return Ok(None);
        }

        if let Some(change) = update.expiry {
            let expiry = match change {
                ExpiryChange::Set(at) => Some(at),
                ExpiryChange::Clear => None,
            };
            sqlx::query("UPDATE images SET expiry_time = $2 WHERE id = $1")
                .bind(id)
                .bind(expiry)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(ref tags) = update.tags {
            sqlx::query("DELETE FROM image_tags WHERE image_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            replace_tags(&mut *tx, id, tags).await?;
        }

        // An expiry in the past makes the record absent from here on.
        let record = fetch_image(&mut *tx, id).await?;
        tx.commit().await?;

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn delete_image(&self, id: Uuid) -> Result<Option<ImageRecord>, StoreError> {
        // Sub-statements share one snapshot, so the tag subquery still sees the
        // rows the cascade is about to remove.
        let sql = format!(
            "WITH i AS (DELETE FROM images WHERE id = $1 RETURNING *) SELECT {IMAGE_COLUMNS} FROM i"
        );
        let row = sqlx::query_as::<_, ImageRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ImageRecord::try_from).transpose()
    }

    #[instrument(skip(self))]
    async fn list_tags(&self) -> Result<Vec<TagCount>, StoreError> {
        let sql = format!(
            "SELECT t.tag AS name, COUNT(*) AS count \
             FROM image_tags t JOIN images i ON i.id = t.image_id \
             WHERE {LIVE} GROUP BY t.tag ORDER BY count DESC, name ASC"
        );
        let rows = sqlx::query_as::<_, TagRow>(&sql).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|row| TagCount {
                name: row.name,
                count: u64::try_from(row.count).unwrap_or(0),
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn delete_tag(&self, name: &str) -> Result<Vec<ImageRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Expired images carrying the tag go too; their blobs still need cleaning up.
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT i.id FROM images i
            JOIN image_tags t ON t.image_id = i.id
            WHERE t.tag = $1
            FOR UPDATE OF i
            "#,
        )
        .bind(name)
        .fetch_all(&mut *tx)
        .await?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!("SELECT {IMAGE_COLUMNS} FROM images i WHERE i.id = ANY($1)");
        let rows = sqlx::query_as::<_, ImageRow>(&sql)
            .bind(&ids)
            .fetch_all(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM images WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        rows.into_iter().map(ImageRecord::try_from).collect()
    }
}
