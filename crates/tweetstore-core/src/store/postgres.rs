//! Document collection kept as a `jsonb` table in Postgres.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};

use super::{
    validate_identifier, DocumentStore, IndexKind, IndexSpec, InsertFailure, InsertOutcome,
    StoreError,
};
use crate::aggregation::{
    Accumulator, Filter, Group, GroupKey, SortDirection, SortKey, Stage, GROUP_ID,
};
use crate::config::DEFAULT_INSERT_BATCH_SIZE;
use crate::document::{Document, FieldValue};

pub struct PostgresStore {
    pool: PgPool,
    table: String,
    batch_size: usize,
}

impl PostgresStore {
    /// Connects and creates the collection table when it does not exist yet.
    pub async fn connect(database_url: &str, collection: &str) -> Result<Self, StoreError> {
        validate_identifier(collection)?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .map_err(StoreError::Connection)?;

        let store = Self {
            pool,
            table: collection.to_string(),
            batch_size: DEFAULT_INSERT_BATCH_SIZE,
        };
        store.create_table().await?;
        info!(collection = %store.table, "connected to postgres document store");
        Ok(store)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn create_table(&self) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (id BIGSERIAL PRIMARY KEY, doc JSONB NOT NULL)",
            self.table
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Inserts one chunk in a transaction. A constraint or data error rolls the
    /// chunk back and retries its rows one by one so only the bad rows fail.
    async fn insert_chunk(
        &self,
        offset: usize,
        docs: Vec<Value>,
        outcome: &mut InsertOutcome,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO \"{}\" (doc) SELECT * FROM UNNEST($1::jsonb[])",
            self.table
        );

        let mut tx = self.pool.begin().await?;
        match sqlx::query(&sql).bind(&docs).execute(&mut *tx).await {
            Ok(result) => {
                tx.commit().await?;
                outcome.inserted += result.rows_affected() as usize;
                return Ok(());
            }
            Err(sqlx::Error::Database(err)) => {
                tx.rollback().await?;
                warn!(offset, error = %err, "batch insert rejected; retrying rows individually");
            }
            Err(err) => return Err(err.into()),
        }

        let single = format!("INSERT INTO \"{}\" (doc) VALUES ($1)", self.table);
        for (i, doc) in docs.into_iter().enumerate() {
            match sqlx::query(&single).bind(doc).execute(&self.pool).await {
                Ok(_) => outcome.inserted += 1,
                Err(sqlx::Error::Database(err)) => outcome.failures.push(InsertFailure {
                    index: offset + i,
                    message: err.to_string(),
                }),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

fn index_name(table: &str, index: &IndexSpec) -> String {
    match index.kind {
        IndexKind::Text => format!("{table}__{}__text", index.field),
        IndexKind::Ascending => format!("{table}__{}__1", index.field),
    }
}

/// Recovers the index from a name built by [`index_name`]. Other indexes on the
/// table, such as the primary key, yield `None`.
fn parse_index_name(table: &str, name: &str) -> Option<IndexSpec> {
    let rest = name.strip_prefix(&format!("{table}__"))?;
    if let Some(field) = rest.strip_suffix("__text") {
        return Some(IndexSpec::text(field));
    }
    rest.strip_suffix("__1").map(IndexSpec::ascending)
}

#[async_trait]
impl DocumentStore for PostgresStore {
    fn describe(&self) -> String {
        format!("postgres collection '{}'", self.table)
    }

    async fn insert_many(&self, documents: &[Document]) -> Result<InsertOutcome, StoreError> {
        let mut outcome = InsertOutcome::default();

        for (chunk_idx, chunk) in documents.chunks(self.batch_size).enumerate() {
            let docs = chunk
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            self.insert_chunk(chunk_idx * self.batch_size, docs, &mut outcome)
                .await?;
            debug!(chunk = chunk_idx, inserted = outcome.inserted, "inserted chunk");
        }

        Ok(outcome)
    }

    async fn ensure_index(&self, index: &IndexSpec) -> Result<(), StoreError> {
        validate_identifier(&index.field)?;
        let name = index_name(&self.table, index);
        let sql = match index.kind {
            IndexKind::Text => format!(
                "CREATE INDEX IF NOT EXISTS \"{name}\" ON \"{}\" \
                 USING GIN (to_tsvector('simple', doc->>'{}'))",
                self.table, index.field
            ),
            IndexKind::Ascending => format!(
                "CREATE INDEX IF NOT EXISTS \"{name}\" ON \"{}\" ((doc->>'{}'))",
                self.table, index.field
            ),
        };
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, StoreError> {
        let rows = sqlx::query(
            "SELECT indexname FROM pg_indexes WHERE tablename = $1 ORDER BY indexname",
        )
        .bind(&self.table)
        .fetch_all(&self.pool)
        .await?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("indexname")?;
            if let Some(spec) = parse_index_name(&self.table, &name) {
                indexes.push(spec);
            }
        }
        indexes.sort();
        Ok(indexes)
    }

    async fn aggregate(&self, stages: &[Stage]) -> Result<Vec<Document>, StoreError> {
        let compiled = compile_pipeline(&self.table, stages)?;
        debug!(sql = %compiled.sql, "running aggregation");

        let mut query = sqlx::query(&compiled.sql);
        for param in &compiled.params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let value: Value = row.try_get("doc")?;
                json_to_document(value)
            })
            .collect()
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) AS n FROM \"{}\"", self.table);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n.max(0) as u64)
    }
}

fn json_to_document(value: Value) -> Result<Document, StoreError> {
    match value {
        Value::Object(map) => Ok(map
            .iter()
            .map(|(key, value)| (key.clone(), FieldValue::from_json(value)))
            .collect()),
        other => Err(StoreError::UnexpectedRow(other.to_string())),
    }
}

/// SQL text plus its positional text parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<String>,
}

struct Select {
    body: String,
    order: Option<String>,
    limit: Option<usize>,
}

impl Select {
    fn render(&self) -> String {
        let mut sql = self.body.clone();
        if let Some(order) = &self.order {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }

    fn is_plain(&self) -> bool {
        self.order.is_none() && self.limit.is_none()
    }
}

/// Compiles aggregation stages into one query returning a `doc` jsonb column.
///
/// Every stage except limit wraps the query so far as a subquery. A limit
/// attaches to the select it follows, so it sees that select's ordering.
pub fn compile_pipeline(table: &str, stages: &[Stage]) -> Result<CompiledQuery, StoreError> {
    validate_identifier(table)?;

    let mut params: Vec<String> = Vec::new();
    let mut current = Select {
        body: format!("SELECT doc FROM \"{table}\""),
        order: None,
        limit: None,
    };

    for (depth, stage) in stages.iter().enumerate() {
        let alias = format!("s{depth}");
        current = match stage {
            Stage::Match(filter) => {
                let predicate = compile_filter(filter, &mut params)?;
                Select {
                    body: format!(
                        "SELECT doc FROM ({}) AS {alias} WHERE {predicate}",
                        current.render()
                    ),
                    order: None,
                    limit: None,
                }
            }
            Stage::Group(group) => Select {
                body: compile_group(group, &current.render(), &alias)?,
                order: None,
                limit: None,
            },
            Stage::Sort(keys) => Select {
                body: format!("SELECT doc FROM ({}) AS {alias}", current.render()),
                order: Some(compile_order(keys)?),
                limit: None,
            },
            Stage::Limit(limit) => {
                let limit = current.limit.map_or(*limit, |existing| existing.min(*limit));
                Select {
                    limit: Some(limit),
                    ..current
                }
            }
        };
    }

    let sql = if current.is_plain() {
        current.body
    } else {
        current.render()
    };
    Ok(CompiledQuery { sql, params })
}

fn compile_filter(filter: &Filter, params: &mut Vec<String>) -> Result<String, StoreError> {
    match filter {
        Filter::TextContains { field, term } => {
            validate_identifier(field)?;
            params.push(term.clone());
            let placeholder = params.len();
            Ok(format!(
                "jsonb_typeof(doc->'{field}') = 'string' \
                 AND strpos(lower(doc->>'{field}'), lower(${placeholder})) > 0"
            ))
        }
    }
}

fn compile_group(group: &Group, source: &str, alias: &str) -> Result<String, StoreError> {
    let key = match &group.key {
        GroupKey::Constant => "'null'::jsonb".to_string(),
        GroupKey::Field(field) => {
            validate_identifier(field)?;
            format!("COALESCE(doc->'{field}', 'null'::jsonb)")
        }
        GroupKey::Day(field) => {
            validate_identifier(field)?;
            format!(
                "COALESCE(to_jsonb(to_char(\
                 (doc->>'{field}')::timestamptz AT TIME ZONE 'UTC', 'YYYY-MM-DD')), 'null'::jsonb)"
            )
        }
        GroupKey::Hour(field) => {
            validate_identifier(field)?;
            format!(
                "COALESCE(to_jsonb(EXTRACT(HOUR FROM \
                 (doc->>'{field}')::timestamptz AT TIME ZONE 'UTC')::int), 'null'::jsonb)"
            )
        }
    };

    let mut fields = vec![format!("'{GROUP_ID}', g.key")];
    for (name, accumulator) in &group.accumulators {
        validate_identifier(name)?;
        let expr = match accumulator {
            Accumulator::Count => "COUNT(*)".to_string(),
            Accumulator::Average(field) => {
                validate_identifier(field)?;
                format!(
                    "AVG(CASE WHEN jsonb_typeof(g.doc->'{field}') = 'number' \
                     THEN (g.doc->>'{field}')::float8 END)"
                )
            }
        };
        fields.push(format!("'{name}', {expr}"));
    }

    Ok(format!(
        "SELECT jsonb_build_object({}) AS doc \
         FROM (SELECT {key} AS key, doc FROM ({source}) AS {alias}) AS g GROUP BY g.key",
        fields.join(", ")
    ))
}

fn compile_order(keys: &[SortKey]) -> Result<String, StoreError> {
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        validate_identifier(&key.field)?;
        let direction = match key.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        parts.push(format!("doc->'{}' {direction}", key.field));
    }
    Ok(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_binds_term_as_parameter() {
        let compiled =
            compile_pipeline("tweets", &[Stage::text_contains("text", "it's (live)")]).unwrap();
        assert_eq!(compiled.params, vec!["it's (live)".to_string()]);
        assert!(compiled.sql.contains("strpos(lower(doc->>'text'), lower($1)) > 0"));
        assert!(!compiled.sql.contains("live"));
    }

    #[test]
    fn group_sort_limit_nest_in_order() {
        let compiled = compile_pipeline(
            "tweets",
            &[
                Stage::text_contains("text", "music"),
                Stage::Group(
                    Group::by(GroupKey::Field("author_handle".into()))
                        .with("count", Accumulator::Count),
                ),
                Stage::sort_by("count", SortDirection::Descending),
                Stage::Limit(1),
            ],
        )
        .unwrap();

        assert!(compiled.sql.starts_with(
            "SELECT doc FROM (SELECT jsonb_build_object('_id', g.key, 'count', COUNT(*))"
        ));
        assert!(compiled
            .sql
            .ends_with("GROUP BY g.key) AS s2 ORDER BY doc->'count' DESC LIMIT 1"));
        assert!(compiled.sql.contains("FROM \"tweets\""));
    }

    #[test]
    fn hour_key_is_extracted_in_utc() {
        let compiled = compile_pipeline(
            "tweets",
            &[Stage::Group(
                Group::by(GroupKey::Hour("created_at".into())).with("count", Accumulator::Count),
            )],
        )
        .unwrap();
        assert!(compiled.sql.contains(
            "EXTRACT(HOUR FROM (doc->>'created_at')::timestamptz AT TIME ZONE 'UTC')::int"
        ));
    }

    #[test]
    fn average_only_counts_numbers() {
        let compiled = compile_pipeline(
            "tweets",
            &[Stage::Group(Group::by(GroupKey::Constant).with(
                "average_likes",
                Accumulator::Average("like_count".into()),
            ))],
        )
        .unwrap();
        assert!(compiled.sql.contains("jsonb_typeof(g.doc->'like_count') = 'number'"));
    }

    #[test]
    fn sort_after_limit_wraps() {
        let compiled = compile_pipeline(
            "tweets",
            &[
                Stage::Limit(5),
                Stage::sort_by("created_at", SortDirection::Ascending),
            ],
        )
        .unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT doc FROM (SELECT doc FROM \"tweets\" LIMIT 5) AS s1 \
             ORDER BY doc->'created_at' ASC"
        );
    }

    #[test]
    fn hostile_field_names_are_rejected() {
        let result = compile_pipeline("tweets", &[Stage::text_contains("text'--", "x")]);
        assert!(matches!(result, Err(StoreError::InvalidIdentifier(_))));
    }

    #[test]
    fn index_names_round_trip_through_table_prefix() {
        for spec in [IndexSpec::text("text"), IndexSpec::ascending("created_at")] {
            let name = index_name("tweets", &spec);
            assert_eq!(parse_index_name("tweets", &name), Some(spec));
        }
        assert_eq!(parse_index_name("tweets", "tweets_pkey"), None);
        assert_eq!(parse_index_name("tweets", "other__text__text"), None);
    }
}
