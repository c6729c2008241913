//! Schema inspection: read the live catalog through a [`Channel`].

use crate::{Channel, ChannelError, JsonRow};
use muster_db_schema::{ObservedColumn, ObservedIndex, ObservedSchema};
use muster_sql::Lit;
use serde_json::Value;

/// Reads `information_schema` and `pg_indexes` for one Postgres schema.
pub struct Inspector<'a, C: Channel + ?Sized> {
    channel: &'a C,
    schema: &'a str,
}

impl<'a, C: Channel + ?Sized> Inspector<'a, C> {
    pub fn new(channel: &'a C, schema: &'a str) -> Self {
        Self { channel, schema }
    }

    pub fn columns_sql(&self) -> String {
        format!(
            "SELECT table_name, column_name, data_type, udt_name, is_nullable, column_default \
             FROM information_schema.columns \
             WHERE table_schema = {} \
             ORDER BY table_name, ordinal_position",
            Lit(self.schema)
        )
    }

    /// Index names with their definitions. The definition carries the key
    /// columns, so an index made by a `UNIQUE` constraint is recognised
    /// whatever it is called.
    pub fn indexes_sql(&self) -> String {
        format!(
            "SELECT tablename AS table_name, indexname AS index_name, indexdef \
             FROM pg_indexes \
             WHERE schemaname = {} \
             ORDER BY tablename, indexname",
            Lit(self.schema)
        )
    }

    /// Every table and column in the schema, in one round trip.
    ///
    /// The result has `indexes_known == false`; see [`Self::inspect_indexes`].
    pub async fn inspect_columns(&self) -> Result<ObservedSchema, ChannelError> {
        let rows = self.channel.query(&self.columns_sql()).await?;

        let mut observed = ObservedSchema::new();
        for row in &rows {
            let table = str_field(row, "table_name")?;
            let column = ObservedColumn {
                name: str_field(row, "column_name")?,
                data_type: str_field(row, "data_type")?,
                udt_name: str_field(row, "udt_name")?,
                nullable: str_field(row, "is_nullable")? == "YES",
                has_default: !matches!(row.get("column_default"), None | Some(Value::Null)),
            };
            observed.table_mut(&table).columns.push(column);
        }

        tracing::debug!(
            schema = self.schema,
            tables = observed.tables.len(),
            columns = rows.len(),
            "inspected columns"
        );
        Ok(observed)
    }

    /// Attach indexes to the tables in `observed`.
    ///
    /// Indexes on tables without columns in `observed` are ignored.
    pub async fn inspect_indexes(&self, observed: &mut ObservedSchema) -> Result<(), ChannelError> {
        let rows = self.channel.query(&self.indexes_sql()).await?;
        for row in &rows {
            let table = str_field(row, "table_name")?;
            let name = str_field(row, "index_name")?;
            let definition = str_field(row, "indexdef")?;
            if let Some(entry) = observed.tables.get_mut(&table) {
                entry
                    .indexes
                    .push(ObservedIndex::from_definition(name, &definition));
            }
        }
        observed.indexes_known = true;
        Ok(())
    }
}

fn str_field(row: &JsonRow, key: &str) -> Result<String, ChannelError> {
    match row.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ChannelError::Decode(format!(
            "column {} should be a string, got {}",
            key, other
        ))),
        None => Err(ChannelError::Decode(format!("column {} is missing", key))),
    }
}
