//! An in-memory [`Channel`] for tests.
//!
//! [`MemoryChannel`] keeps an [`ObservedSchema`] behind a mutex and answers
//! the two catalog queries the inspector issues. Executed statements that
//! match DDL the remediator can generate for its [`RuleSet`] are applied to
//! the catalog; `DROP TABLE` is understood too. Anything else is recorded
//! and otherwise ignored.
//!
//! There are no rows, only a per-table "has rows" mark set with
//! [`MemoryChannel::populate`]. On a marked table, adding a `NOT NULL`
//! column without a default fails the way Postgres fails it.
//!
//! ```ignore
//! let channel = MemoryChannel::matching(RuleSet::application());
//! channel.drop_column("user_roles", "is_active");
//! let report = Auditor::new(&channel, &rules).run().await;
//! assert_eq!(report.issue_count(), 1);
//! ```

use crate::{BoxFuture, Channel, ChannelError, JsonRow, RuleSet};
use muster_db_schema::{ObservedColumn, ObservedIndex, ObservedSchema, ObservedTable};
use muster_sql::Ddl;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// SQLSTATE for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";
/// SQLSTATE for `not_null_violation`.
const NOT_NULL_VIOLATION: &str = "23502";

#[derive(Default)]
struct State {
    schema: ObservedSchema,
    populated: HashSet<String>,
    executed: Vec<String>,
    calls: usize,
    failure: Option<ChannelError>,
    failing_statements: Vec<(String, String)>,
    fail_index_query: bool,
}

/// A fake database whose catalog lives in memory.
pub struct MemoryChannel {
    rules: RuleSet,
    state: Mutex<State>,
}

impl MemoryChannel {
    /// A database with no tables.
    pub fn empty(rules: RuleSet) -> Self {
        Self {
            rules,
            state: Mutex::new(State::default()),
        }
    }

    /// A database that already matches `rules` exactly.
    pub fn matching(rules: RuleSet) -> Self {
        let channel = Self::empty(rules);
        {
            let mut state = channel.lock();
            for spec in rules.tables() {
                state.schema.insert(ObservedTable::from_spec(spec));
            }
        }
        channel
    }

    /// Every call fails as if the `exec_sql` function did not exist.
    pub fn without_rpc(self) -> Self {
        self.lock().failure = Some(ChannelError::RpcUnavailable {
            function: "exec_sql".to_string(),
        });
        self
    }

    /// Every call fails as if the database were unreachable.
    pub fn offline(self) -> Self {
        self.lock().failure = Some(ChannelError::Connection(
            "connection refused".to_string(),
        ));
        self
    }

    /// Statements containing `pattern` are rejected with `message`.
    pub fn fail_statements_containing(self, pattern: &str, message: &str) -> Self {
        self.lock()
            .failing_statements
            .push((pattern.to_string(), message.to_string()));
        self
    }

    /// The `pg_indexes` query fails; column queries still work.
    pub fn fail_index_query(self) -> Self {
        self.lock().fail_index_query = true;
        self
    }

    /// Take the database offline (or bring it back) after construction.
    pub fn set_failure(&self, failure: Option<ChannelError>) {
        self.lock().failure = failure;
    }

    pub fn drop_table(&self, table: &str) {
        let mut state = self.lock();
        state.schema.tables.shift_remove(table);
        state.populated.remove(table);
    }

    /// Mark `table` as holding rows.
    pub fn populate(&self, table: &str) {
        self.lock().populated.insert(table.to_string());
    }

    pub fn drop_column(&self, table: &str, column: &str) {
        if let Some(entry) = self.lock().schema.tables.get_mut(table) {
            entry.columns.retain(|c| c.name != column);
        }
    }

    pub fn drop_index(&self, table: &str, index: &str) {
        if let Some(entry) = self.lock().schema.tables.get_mut(table) {
            entry.indexes.retain(|i| i.name != index);
        }
    }

    /// Add an index under any name, e.g. one backing a `UNIQUE` constraint.
    pub fn add_index(&self, table: &str, index: ObservedIndex) {
        self.lock().schema.table_mut(table).indexes.push(index);
    }

    /// Replace (or add) a column on an existing table.
    pub fn set_column(&self, table: &str, column: ObservedColumn) {
        let mut state = self.lock();
        let entry = state.schema.table_mut(table);
        match entry.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => entry.columns.push(column),
        }
    }

    pub fn add_table(&self, table: ObservedTable) {
        self.lock().schema.insert(table);
    }

    /// Statements passed to `execute`, in order, including rejected ones.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    /// Number of `query` and `execute` calls received.
    pub fn call_count(&self) -> usize {
        self.lock().calls
    }

    /// The current catalog.
    pub fn observed(&self) -> ObservedSchema {
        self.lock().schema.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn run_query(&self, sql: &str) -> Result<Vec<JsonRow>, ChannelError> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        if sql.contains("information_schema.columns") {
            Ok(column_rows(&state.schema))
        } else if sql.contains("pg_indexes") {
            if state.fail_index_query {
                return Err(ChannelError::Sql {
                    code: Some("42501".to_string()),
                    message: "permission denied for view pg_indexes".to_string(),
                });
            }
            Ok(index_rows(&state.schema))
        } else {
            Ok(Vec::new())
        }
    }

    fn run_execute(&self, sql: &str) -> Result<(), ChannelError> {
        let mut state = self.lock();
        state.calls += 1;
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }
        state.executed.push(sql.to_string());

        if let Some((_, message)) = state
            .failing_statements
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
        {
            return Err(ChannelError::Sql {
                code: None,
                message: message.clone(),
            });
        }

        if let Some(target) = drop_table_target(sql) {
            state.populated.remove(&target.name);
            if state.schema.tables.shift_remove(&target.name).is_none() && !target.if_exists {
                return Err(undefined_table(&target.name));
            }
            return Ok(());
        }

        match self.recognize(sql) {
            Some(ddl) => apply(&mut state, &ddl),
            None => Ok(()),
        }
    }

    /// Find the rule-derived DDL that renders exactly as `sql`.
    fn recognize(&self, sql: &str) -> Option<Ddl> {
        let sql = sql.trim();
        for spec in self.rules.tables() {
            let create = spec.to_create_ddl();
            if create.to_string() == sql {
                return Some(create);
            }
            for column in spec.columns {
                for def in [column.to_column_def(), column.to_added_column_def()] {
                    let add = Ddl::AddColumn {
                        table: spec.name.to_string(),
                        column: def,
                    };
                    if add.to_string() == sql {
                        return Some(add);
                    }
                }
            }
            for index in spec.indexes {
                let create = index.to_ddl(spec.name);
                if create.to_string() == sql {
                    return Some(create);
                }
            }
        }
        None
    }
}

impl Channel for MemoryChannel {
    fn query<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<Vec<JsonRow>, ChannelError>> {
        let result = self.run_query(sql);
        Box::pin(async move { result })
    }

    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<(), ChannelError>> {
        let result = self.run_execute(sql);
        Box::pin(async move { result })
    }
}

fn apply(state: &mut State, ddl: &Ddl) -> Result<(), ChannelError> {
    let has_rows = state.populated.contains(ddl.table());
    let schema = &mut state.schema;
    match ddl {
        Ddl::CreateTable { table, columns, .. } => {
            if schema.table(table).is_none() {
                let mut entry = ObservedTable::new(table.as_str());
                entry.columns = columns.iter().map(observed_from_def).collect();
                schema.insert(entry);
            }
            Ok(())
        }
        Ddl::AddColumn { table, column } => {
            let entry = schema
                .tables
                .get_mut(table)
                .ok_or_else(|| undefined_table(table))?;
            if entry.column(&column.name).is_some() {
                return Ok(());
            }
            if has_rows && column.not_null && column.default.is_none() {
                return Err(ChannelError::Sql {
                    code: Some(NOT_NULL_VIOLATION.to_string()),
                    message: format!(
                        "column \"{}\" of relation \"{}\" contains null values",
                        column.name, table
                    ),
                });
            }
            entry.columns.push(observed_from_def(column));
            Ok(())
        }
        Ddl::CreateIndex {
            name,
            table,
            columns,
            unique,
        } => {
            let entry = schema
                .tables
                .get_mut(table)
                .ok_or_else(|| undefined_table(table))?;
            if !entry.has_index(name) {
                entry.indexes.push(ObservedIndex {
                    name: name.clone(),
                    columns: columns.clone(),
                    unique: *unique,
                    partial: false,
                });
            }
            Ok(())
        }
    }
}

fn observed_from_def(def: &muster_sql::ColumnDef) -> ObservedColumn {
    let pg_type = muster_db_schema::PgType::ALL
        .into_iter()
        .find(|t| t.to_string() == def.sql_type);
    let (data_type, udt_name) = match pg_type {
        Some(t) => t.catalog_names(),
        None => ("USER-DEFINED", "unknown"),
    };
    ObservedColumn {
        name: def.name.clone(),
        data_type: data_type.to_string(),
        udt_name: udt_name.to_string(),
        nullable: !def.not_null,
        has_default: def.default.is_some(),
    }
}

fn undefined_table(table: &str) -> ChannelError {
    ChannelError::Sql {
        code: Some(UNDEFINED_TABLE.to_string()),
        message: format!("relation \"{}\" does not exist", table),
    }
}

struct DropTarget {
    name: String,
    if_exists: bool,
}

fn drop_table_target(sql: &str) -> Option<DropTarget> {
    let words: Vec<&str> = sql.trim().trim_end_matches(';').split_whitespace().collect();
    let (if_exists, name) = match words.as_slice() {
        [d, t, name] if is(d, "drop") && is(t, "table") => (false, *name),
        [d, t, i, e, name] if is(d, "drop") && is(t, "table") && is(i, "if") && is(e, "exists") => {
            (true, *name)
        }
        _ => return None,
    };
    Some(DropTarget {
        name: name.trim_matches('"').to_string(),
        if_exists,
    })
}

fn is(word: &str, keyword: &str) -> bool {
    word.eq_ignore_ascii_case(keyword)
}

fn column_rows(schema: &ObservedSchema) -> Vec<JsonRow> {
    let mut rows = Vec::new();
    for table in schema.tables.values() {
        for column in &table.columns {
            let mut row = JsonRow::new();
            row.insert("table_name".into(), Value::from(table.name.as_str()));
            row.insert("column_name".into(), Value::from(column.name.as_str()));
            row.insert("data_type".into(), Value::from(column.data_type.as_str()));
            row.insert("udt_name".into(), Value::from(column.udt_name.as_str()));
            let nullable = if column.nullable { "YES" } else { "NO" };
            row.insert("is_nullable".into(), Value::from(nullable));
            let default = if column.has_default {
                Value::from("default")
            } else {
                Value::Null
            };
            row.insert("column_default".into(), default);
            rows.push(row);
        }
    }
    rows
}

fn index_rows(schema: &ObservedSchema) -> Vec<JsonRow> {
    let mut rows = Vec::new();
    for table in schema.tables.values() {
        for index in &table.indexes {
            let mut row = JsonRow::new();
            row.insert("table_name".into(), Value::from(table.name.as_str()));
            row.insert("index_name".into(), Value::from(index.name.as_str()));
            row.insert("indexdef".into(), Value::from(index.definition(&table.name)));
            rows.push(row);
        }
    }
    rows
}
