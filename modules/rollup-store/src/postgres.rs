//! PgRollupStore: rolled-up dates backed by Postgres.
//!
//! The finder is one `UNION ALL` over the three candidate sources followed by
//! `DISTINCT ON (parent_id)`, so the provenance returned is that of the exact
//! row holding the extremal date.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use rollup_common::{
    DateField, DatesSource, FixedDatesUpdate, MilestoneId, ParentLink, RolledUpDate, RollupError,
    WorkItem, WorkItemId, WorkItemType,
};

use crate::store::RollupStore;

const DATES_SOURCE_COLUMNS: &str = r#"
    work_item_id, start_date, due_date, start_date_fixed, due_date_fixed,
    start_date_is_fixed, due_date_is_fixed,
    start_date_sourcing_milestone_id, due_date_sourcing_milestone_id,
    start_date_sourcing_work_item_id, due_date_sourcing_work_item_id
"#;

const MIRROR_SQL: &str = r#"
    UPDATE legacy_epics AS e
    SET start_date = ds.start_date,
        end_date = ds.due_date,
        start_date_fixed = ds.start_date_fixed,
        due_date_fixed = ds.due_date_fixed,
        start_date_is_fixed = ds.start_date_is_fixed,
        due_date_is_fixed = ds.due_date_is_fixed,
        start_date_sourcing_milestone_id = ds.start_date_sourcing_milestone_id,
        due_date_sourcing_milestone_id = ds.due_date_sourcing_milestone_id,
        start_date_sourcing_epic_id = ds.start_date_sourcing_work_item_id,
        due_date_sourcing_epic_id = ds.due_date_sourcing_work_item_id,
        updated_at = now()
    FROM work_item_dates_sources ds
    WHERE ds.work_item_id = e.work_item_id
      AND e.work_item_id = ANY($1)
"#;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct WorkItemRow {
    id: i64,
    parent_id: Option<i64>,
    work_item_type: String,
    milestone_id: Option<i64>,
    start_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
}

impl TryFrom<WorkItemRow> for WorkItem {
    type Error = anyhow::Error;

    fn try_from(row: WorkItemRow) -> Result<Self> {
        let work_item_type = WorkItemType::parse(&row.work_item_type)
            .ok_or_else(|| anyhow!("unknown work item type {:?} on {}", row.work_item_type, row.id))?;
        Ok(WorkItem {
            id: row.id,
            parent_id: row.parent_id,
            work_item_type,
            milestone_id: row.milestone_id,
            start_date: row.start_date,
            due_date: row.due_date,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DatesSourceRow {
    work_item_id: i64,
    start_date: Option<NaiveDate>,
    due_date: Option<NaiveDate>,
    start_date_fixed: Option<NaiveDate>,
    due_date_fixed: Option<NaiveDate>,
    start_date_is_fixed: bool,
    due_date_is_fixed: bool,
    start_date_sourcing_milestone_id: Option<i64>,
    due_date_sourcing_milestone_id: Option<i64>,
    start_date_sourcing_work_item_id: Option<i64>,
    due_date_sourcing_work_item_id: Option<i64>,
}

impl From<DatesSourceRow> for DatesSource {
    fn from(row: DatesSourceRow) -> Self {
        DatesSource {
            work_item_id: row.work_item_id,
            start_date: row.start_date,
            due_date: row.due_date,
            start_date_fixed: row.start_date_fixed,
            due_date_fixed: row.due_date_fixed,
            start_date_is_fixed: row.start_date_is_fixed,
            due_date_is_fixed: row.due_date_is_fixed,
            start_date_sourcing_milestone_id: row.start_date_sourcing_milestone_id,
            due_date_sourcing_milestone_id: row.due_date_sourcing_milestone_id,
            start_date_sourcing_work_item_id: row.start_date_sourcing_work_item_id,
            due_date_sourcing_work_item_id: row.due_date_sourcing_work_item_id,
        }
    }
}

// ---------------------------------------------------------------------------
// PgRollupStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgRollupStore {
    pool: PgPool,
}

impl PgRollupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("connecting to rollup database")?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RollupError::Database(e.to_string()))?;
        Ok(())
    }
}

fn rolled_up_sql(field: DateField) -> String {
    let column = field.column();
    let order = field.sort_order();
    format!(
        r#"
        WITH children AS (
            SELECT wi.id,
                   wi.parent_id,
                   wi.milestone_id,
                   m.{column} AS milestone_value,
                   ds.work_item_id IS NOT NULL AS has_dates_source,
                   ds.{column} AS dates_source_value,
                   wi.{column} AS legacy_value
            FROM work_items wi
            LEFT JOIN milestones m ON m.id = wi.milestone_id
            LEFT JOIN work_item_dates_sources ds ON ds.work_item_id = wi.id
            WHERE wi.parent_id = ANY($1)
        ),
        candidates AS (
            SELECT parent_id, milestone_value AS value,
                   milestone_id AS sourcing_milestone_id, NULL::BIGINT AS sourcing_work_item_id
            FROM children
            WHERE milestone_value IS NOT NULL
            UNION ALL
            SELECT parent_id, dates_source_value, NULL::BIGINT, id
            FROM children
            WHERE milestone_value IS NULL AND has_dates_source AND dates_source_value IS NOT NULL
            UNION ALL
            SELECT parent_id, legacy_value, NULL::BIGINT, id
            FROM children
            WHERE milestone_value IS NULL AND NOT has_dates_source AND legacy_value IS NOT NULL
        )
        SELECT DISTINCT ON (parent_id) parent_id, value, sourcing_milestone_id, sourcing_work_item_id
        FROM candidates
        ORDER BY parent_id, value {order}
        "#
    )
}

async fn fetch_rolled_up(
    conn: &mut PgConnection,
    parents: &[WorkItemId],
    field: DateField,
) -> Result<HashMap<WorkItemId, RolledUpDate>> {
    let sql = rolled_up_sql(field);
    let rows = sqlx::query_as::<_, (i64, NaiveDate, Option<i64>, Option<i64>)>(&sql)
        .bind(parents)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(parent_id, value, sourcing_milestone_id, sourcing_work_item_id)| {
            (
                parent_id,
                RolledUpDate {
                    value,
                    sourcing_milestone_id,
                    sourcing_work_item_id,
                },
            )
        })
        .collect())
}

async fn fetch_dates_sources(conn: &mut PgConnection, ids: &[WorkItemId]) -> Result<Vec<DatesSource>> {
    let sql = format!(
        "SELECT {DATES_SOURCE_COLUMNS} FROM work_item_dates_sources WHERE work_item_id = ANY($1) ORDER BY work_item_id"
    );
    let rows = sqlx::query_as::<_, DatesSourceRow>(&sql)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;

    Ok(rows.into_iter().map(DatesSource::from).collect())
}

#[async_trait]
impl RollupStore for PgRollupStore {
    async fn existing_work_items(&self, ids: &[WorkItemId]) -> Result<Vec<WorkItemId>> {
        let rows = sqlx::query_scalar::<_, i64>("SELECT id FROM work_items WHERE id = ANY($1) ORDER BY id")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn work_item(&self, id: WorkItemId) -> Result<Option<WorkItem>> {
        let row = sqlx::query_as::<_, WorkItemRow>(
            r#"
            SELECT id, parent_id, work_item_type, milestone_id, start_date, due_date
            FROM work_items
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(WorkItem::try_from).transpose()
    }

    async fn dates_source(&self, id: WorkItemId) -> Result<Option<DatesSource>> {
        let mut conn = self.pool.acquire().await?;
        Ok(fetch_dates_sources(&mut conn, &[id]).await?.into_iter().next())
    }

    async fn descendant_links(&self, ids: &[WorkItemId]) -> Result<Vec<ParentLink>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            WITH RECURSIVE descendants AS (
                SELECT id, parent_id
                FROM work_items
                WHERE parent_id = ANY($1)
                UNION
                SELECT wi.id, wi.parent_id
                FROM work_items wi
                JOIN descendants d ON wi.parent_id = d.id
            )
            SELECT id, parent_id FROM descendants
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(work_item_id, parent_id)| ParentLink {
                work_item_id,
                parent_id,
            })
            .collect())
    }

    async fn parent_links(&self, ids: &[WorkItemId]) -> Result<Vec<ParentLink>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            "SELECT id, parent_id FROM work_items WHERE id = ANY($1) AND parent_id IS NOT NULL",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(work_item_id, parent_id)| ParentLink {
                work_item_id,
                parent_id,
            })
            .collect())
    }

    async fn work_items_with_milestone(&self, milestone_id: MilestoneId) -> Result<Vec<WorkItemId>> {
        let rows = sqlx::query_scalar::<_, i64>("SELECT id FROM work_items WHERE milestone_id = $1 ORDER BY id")
            .bind(milestone_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn rolled_up_dates(
        &self,
        parents: &[WorkItemId],
        field: DateField,
    ) -> Result<HashMap<WorkItemId, RolledUpDate>> {
        let mut conn = self.pool.acquire().await?;
        fetch_rolled_up(&mut conn, parents, field).await
    }

    async fn ensure_dates_sources(&self, ids: &[WorkItemId]) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO work_item_dates_sources (work_item_id, start_date, due_date)
            SELECT id, start_date, due_date
            FROM work_items
            WHERE id = ANY($1)
            ON CONFLICT (work_item_id) DO NOTHING
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn apply_rollup(&self, layers: &[Vec<WorkItemId>], mirror: bool) -> Result<Vec<DatesSource>> {
        let mut tx = self.pool.begin().await?;

        for layer in layers {
            for field in DateField::ALL {
                let rolled_up = fetch_rolled_up(&mut *tx, layer, field).await?;

                let mut values = Vec::with_capacity(layer.len());
                let mut milestones = Vec::with_capacity(layer.len());
                let mut work_items = Vec::with_capacity(layer.len());
                for id in layer {
                    let r = rolled_up.get(id);
                    values.push(r.map(|r| r.value));
                    milestones.push(r.and_then(|r| r.sourcing_milestone_id));
                    work_items.push(r.and_then(|r| r.sourcing_work_item_id));
                }

                let column = field.column();
                sqlx::query(&format!(
                    r#"
                    UPDATE work_item_dates_sources AS ds
                    SET {column} = u.value,
                        {column}_sourcing_milestone_id = u.milestone_id,
                        {column}_sourcing_work_item_id = u.work_item_id
                    FROM UNNEST($1::BIGINT[], $2::DATE[], $3::BIGINT[], $4::BIGINT[])
                        AS u(id, value, milestone_id, work_item_id)
                    WHERE ds.work_item_id = u.id
                      AND ds.{column}_is_fixed = FALSE
                      AND (
                          EXISTS (SELECT 1 FROM work_items c WHERE c.parent_id = ds.work_item_id)
                          OR ds.{column}_sourcing_milestone_id IS NOT NULL
                          OR ds.{column}_sourcing_work_item_id IS NOT NULL
                      )
                    "#
                ))
                .bind(layer)
                .bind(values)
                .bind(milestones)
                .bind(work_items)
                .execute(&mut *tx)
                .await?;
            }
        }

        let ids: Vec<WorkItemId> = layers.iter().flatten().copied().collect();
        if mirror {
            let mirrored = sqlx::query(MIRROR_SQL).bind(&ids).execute(&mut *tx).await?;
            debug!(rows = mirrored.rows_affected(), "Mirrored rolled-up dates to legacy epics");
        }

        let updated = fetch_dates_sources(&mut *tx, &ids).await?;
        tx.commit().await?;

        Ok(updated)
    }

    async fn set_fixed_dates(
        &self,
        id: WorkItemId,
        update: &FixedDatesUpdate,
        mirror: bool,
    ) -> Result<DatesSource> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM work_items WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(RollupError::NotFound(id).into());
        }

        sqlx::query(
            r#"
            INSERT INTO work_item_dates_sources (work_item_id, start_date, due_date)
            SELECT id, start_date, due_date FROM work_items WHERE id = $1
            ON CONFLICT (work_item_id) DO NOTHING
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, DatesSourceRow>(&format!(
            "SELECT {DATES_SOURCE_COLUMNS} FROM work_item_dates_sources WHERE work_item_id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        let mut source = DatesSource::from(row);
        source.apply_fixed(update);

        sqlx::query(
            r#"
            UPDATE work_item_dates_sources
            SET start_date = $2,
                due_date = $3,
                start_date_fixed = $4,
                due_date_fixed = $5,
                start_date_is_fixed = $6,
                due_date_is_fixed = $7,
                start_date_sourcing_milestone_id = $8,
                due_date_sourcing_milestone_id = $9,
                start_date_sourcing_work_item_id = $10,
                due_date_sourcing_work_item_id = $11
            WHERE work_item_id = $1
            "#,
        )
        .bind(id)
        .bind(source.start_date)
        .bind(source.due_date)
        .bind(source.start_date_fixed)
        .bind(source.due_date_fixed)
        .bind(source.start_date_is_fixed)
        .bind(source.due_date_is_fixed)
        .bind(source.start_date_sourcing_milestone_id)
        .bind(source.due_date_sourcing_milestone_id)
        .bind(source.start_date_sourcing_work_item_id)
        .bind(source.due_date_sourcing_work_item_id)
        .execute(&mut *tx)
        .await?;

        if mirror {
            sqlx::query(MIRROR_SQL).bind(vec![id]).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(source)
    }
}
