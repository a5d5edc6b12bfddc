use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventEnvelope, EventId, InstanceId, InstanceStoreError, Result, Sequence,
    store::{AppendOptions, InstanceStore, validate_events_for_append},
};

/// PostgreSQL-backed instance store.
#[derive(Clone)]
pub struct PostgresInstanceStore {
    pool: PgPool,
}

impl PostgresInstanceStore {
    /// Creates a new PostgreSQL instance store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("Instance store migrations applied");
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            instance_id: InstanceId::from_uuid(row.try_get::<Uuid, _>("instance_id")?),
            sequence: Sequence::new(row.try_get("sequence")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

#[async_trait]
impl InstanceStore for PostgresInstanceStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Sequence> {
        validate_events_for_append(&events)?;

        let first_event = &events[0];
        let instance_id = first_event.instance_id;

        let mut tx = self.pool.begin().await?;

        if let Some(expected) = options.expected_sequence {
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(sequence) FROM instance_events WHERE instance_id = $1",
            )
            .bind(instance_id.as_uuid())
            .fetch_one(&mut *tx)
            .await?;

            let actual = Sequence::new(current.unwrap_or(0));

            if actual != expected {
                return Err(InstanceStoreError::SequenceConflict {
                    instance_id,
                    expected,
                    actual,
                });
            }
        }

        let mut last_sequence = Sequence::initial();
        for event in &events {
            let metadata_json = serde_json::to_value(&event.metadata)?;

            sqlx::query(
                r#"
                INSERT INTO instance_events (id, event_type, instance_id, sequence, timestamp, payload, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.instance_id.as_uuid())
            .bind(event.sequence.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                // Unique (instance_id, sequence) violation means a
                // concurrent writer won the race.
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_instance_sequence")
                {
                    return InstanceStoreError::SequenceConflict {
                        instance_id,
                        expected: options.expected_sequence.unwrap_or(Sequence::initial()),
                        actual: event.sequence,
                    };
                }
                InstanceStoreError::Database(e)
            })?;

            last_sequence = event.sequence;
        }

        tx.commit().await?;
        tracing::debug!(
            instance_id = %instance_id,
            count = events.len(),
            last_sequence = last_sequence.as_i64(),
            "Appended instance events"
        );
        Ok(last_sequence)
    }

    async fn events_for_instance(&self, instance_id: InstanceId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, instance_id, sequence, timestamp, payload, metadata
            FROM instance_events
            WHERE instance_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(instance_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn events_from_sequence(
        &self,
        instance_id: InstanceId,
        from_sequence: Sequence,
    ) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, instance_id, sequence, timestamp, payload, metadata
            FROM instance_events
            WHERE instance_id = $1 AND sequence >= $2
            ORDER BY sequence ASC
            "#,
        )
        .bind(instance_id.as_uuid())
        .bind(from_sequence.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn current_sequence(&self, instance_id: InstanceId) -> Result<Option<Sequence>> {
        let sequence: Option<i64> =
            sqlx::query_scalar("SELECT MAX(sequence) FROM instance_events WHERE instance_id = $1")
                .bind(instance_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;

        Ok(sequence.map(Sequence::new))
    }

    async fn list_instances(&self) -> Result<Vec<InstanceId>> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT instance_id FROM instance_events ORDER BY instance_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(InstanceId::from_uuid).collect())
    }
}
