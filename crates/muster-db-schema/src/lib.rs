//! Database schema types for muster.
//!
//! Two halves live here: the *expected* shape ([`TableSpec`], [`ColumnSpec`],
//! [`IndexSpec`]), authored by developers and compiled in, and the *observed*
//! shape ([`ObservedSchema`]), decoded from the live catalog on every request.

use indexmap::IndexMap;
use muster_sql::{ColumnDef, Ddl, index_name, unique_index_name};
use serde::{Serialize, Serializer};
use std::fmt;

/// Postgres column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgType {
    /// SMALLINT (2 bytes)
    SmallInt,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// REAL (4 bytes floating point)
    Real,
    /// DOUBLE PRECISION (8 bytes floating point)
    DoublePrecision,
    /// NUMERIC (arbitrary precision)
    Numeric,
    /// BOOLEAN
    Boolean,
    /// TEXT
    Text,
    /// VARCHAR (unbounded)
    Varchar,
    /// BYTEA (binary)
    Bytea,
    /// TIMESTAMPTZ
    Timestamptz,
    /// TIMESTAMP (without time zone)
    Timestamp,
    /// DATE
    Date,
    /// TIME
    Time,
    /// UUID
    Uuid,
    /// JSON
    Json,
    /// JSONB
    Jsonb,
    /// TEXT[] (array of text)
    TextArray,
    /// INTEGER[] (array of integer)
    IntegerArray,
    /// BIGINT[] (array of bigint)
    BigIntArray,
}

impl PgType {
    /// The family this type belongs to for compatibility checks.
    pub fn family(&self) -> TypeFamily {
        match self {
            PgType::SmallInt | PgType::Integer | PgType::BigInt => TypeFamily::Integer,
            PgType::Real | PgType::DoublePrecision => TypeFamily::Float,
            PgType::Numeric => TypeFamily::Numeric,
            PgType::Boolean => TypeFamily::Boolean,
            PgType::Text | PgType::Varchar => TypeFamily::Text,
            PgType::Bytea => TypeFamily::Bytes,
            PgType::Timestamptz | PgType::Timestamp => TypeFamily::Timestamp,
            PgType::Date => TypeFamily::Date,
            PgType::Time => TypeFamily::Time,
            PgType::Uuid => TypeFamily::Uuid,
            PgType::Json | PgType::Jsonb => TypeFamily::Json,
            PgType::TextArray => TypeFamily::TextArray,
            PgType::IntegerArray | PgType::BigIntArray => TypeFamily::IntegerArray,
        }
    }
}

impl PgType {
    /// How `information_schema.columns` reports this type, as
    /// `(data_type, udt_name)`.
    pub fn catalog_names(&self) -> (&'static str, &'static str) {
        match self {
            PgType::SmallInt => ("smallint", "int2"),
            PgType::Integer => ("integer", "int4"),
            PgType::BigInt => ("bigint", "int8"),
            PgType::Real => ("real", "float4"),
            PgType::DoublePrecision => ("double precision", "float8"),
            PgType::Numeric => ("numeric", "numeric"),
            PgType::Boolean => ("boolean", "bool"),
            PgType::Text => ("text", "text"),
            PgType::Varchar => ("character varying", "varchar"),
            PgType::Bytea => ("bytea", "bytea"),
            PgType::Timestamptz => ("timestamp with time zone", "timestamptz"),
            PgType::Timestamp => ("timestamp without time zone", "timestamp"),
            PgType::Date => ("date", "date"),
            PgType::Time => ("time without time zone", "time"),
            PgType::Uuid => ("uuid", "uuid"),
            PgType::Json => ("json", "json"),
            PgType::Jsonb => ("jsonb", "jsonb"),
            PgType::TextArray => ("ARRAY", "_text"),
            PgType::IntegerArray => ("ARRAY", "_int4"),
            PgType::BigIntArray => ("ARRAY", "_int8"),
        }
    }

    /// Every variant, in declaration order.
    pub const ALL: [PgType; 20] = [
        PgType::SmallInt,
        PgType::Integer,
        PgType::BigInt,
        PgType::Real,
        PgType::DoublePrecision,
        PgType::Numeric,
        PgType::Boolean,
        PgType::Text,
        PgType::Varchar,
        PgType::Bytea,
        PgType::Timestamptz,
        PgType::Timestamp,
        PgType::Date,
        PgType::Time,
        PgType::Uuid,
        PgType::Json,
        PgType::Jsonb,
        PgType::TextArray,
        PgType::IntegerArray,
        PgType::BigIntArray,
    ];
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgType::SmallInt => write!(f, "SMALLINT"),
            PgType::Integer => write!(f, "INTEGER"),
            PgType::BigInt => write!(f, "BIGINT"),
            PgType::Real => write!(f, "REAL"),
            PgType::DoublePrecision => write!(f, "DOUBLE PRECISION"),
            PgType::Numeric => write!(f, "NUMERIC"),
            PgType::Boolean => write!(f, "BOOLEAN"),
            PgType::Text => write!(f, "TEXT"),
            PgType::Varchar => write!(f, "VARCHAR"),
            PgType::Bytea => write!(f, "BYTEA"),
            PgType::Timestamptz => write!(f, "TIMESTAMPTZ"),
            PgType::Timestamp => write!(f, "TIMESTAMP"),
            PgType::Date => write!(f, "DATE"),
            PgType::Time => write!(f, "TIME"),
            PgType::Uuid => write!(f, "UUID"),
            PgType::Json => write!(f, "JSON"),
            PgType::Jsonb => write!(f, "JSONB"),
            PgType::TextArray => write!(f, "TEXT[]"),
            PgType::IntegerArray => write!(f, "INTEGER[]"),
            PgType::BigIntArray => write!(f, "BIGINT[]"),
        }
    }
}

impl Serialize for PgType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Groups of types that are interchangeable as far as the application's
/// queries are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeFamily {
    Text,
    Integer,
    Float,
    Numeric,
    Boolean,
    Timestamp,
    Date,
    Time,
    Uuid,
    Json,
    Bytes,
    TextArray,
    IntegerArray,
    /// Enums, domains, and anything else not modelled above.
    Unknown,
}

impl TypeFamily {
    /// Classify a column from `information_schema.columns`.
    ///
    /// `data_type` is the standard type name (`timestamp with time zone`,
    /// `ARRAY`, `USER-DEFINED`, ...); `udt_name` is the underlying Postgres
    /// type name and disambiguates arrays (`_text`, `_int4`).
    pub fn from_catalog(data_type: &str, udt_name: &str) -> TypeFamily {
        match data_type.trim().to_ascii_lowercase().as_str() {
            "text" | "character varying" | "character" | "varchar" | "char" | "citext" => {
                TypeFamily::Text
            }
            "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" => TypeFamily::Integer,
            "real" | "double precision" | "float4" | "float8" => TypeFamily::Float,
            "numeric" | "decimal" => TypeFamily::Numeric,
            "boolean" | "bool" => TypeFamily::Boolean,
            "timestamp with time zone"
            | "timestamp without time zone"
            | "timestamptz"
            | "timestamp" => TypeFamily::Timestamp,
            "date" => TypeFamily::Date,
            "time with time zone" | "time without time zone" | "time" | "timetz" => {
                TypeFamily::Time
            }
            "uuid" => TypeFamily::Uuid,
            "json" | "jsonb" => TypeFamily::Json,
            "bytea" => TypeFamily::Bytes,
            "array" => match udt_name.trim_start_matches('_') {
                "text" | "varchar" | "bpchar" => TypeFamily::TextArray,
                "int2" | "int4" | "int8" => TypeFamily::IntegerArray,
                _ => TypeFamily::Unknown,
            },
            _ => TypeFamily::Unknown,
        }
    }

    /// Whether an observed column of family `observed` satisfies this one.
    pub fn accepts(&self, observed: TypeFamily) -> bool {
        *self != TypeFamily::Unknown && *self == observed
    }
}

/// An expected column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub name: &'static str,
    #[serde(rename = "expectedType")]
    pub pg_type: PgType,
    pub nullable: bool,
    /// Default value expression (if any)
    pub default: Option<&'static str>,
}

impl ColumnSpec {
    /// A `NOT NULL` column without a default.
    pub const fn new(name: &'static str, pg_type: PgType) -> Self {
        Self {
            name,
            pg_type,
            nullable: false,
            default: None,
        }
    }

    pub const fn nullable(self) -> Self {
        Self {
            nullable: true,
            ..self
        }
    }

    pub const fn default(self, expr: &'static str) -> Self {
        Self {
            default: Some(expr),
            ..self
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// The column as the DDL builder renders it.
    pub fn to_column_def(&self) -> ColumnDef {
        ColumnDef {
            name: self.name.to_string(),
            sql_type: self.pg_type.to_string(),
            not_null: !self.nullable,
            default: self.default.map(str::to_string),
        }
    }

    /// The column as `ADD COLUMN` renders it on a table that already exists.
    ///
    /// Existing rows take the default, or NULL when there is none, and
    /// Postgres rejects `NOT NULL` in that case. Such a column is added as
    /// nullable and left for an operator to backfill and tighten.
    pub fn to_added_column_def(&self) -> ColumnDef {
        let mut def = self.to_column_def();
        def.not_null &= def.default.is_some();
        def
    }
}

/// An expected index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexSpec {
    pub columns: &'static [&'static str],
    pub unique: bool,
}

impl IndexSpec {
    pub const fn new(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            unique: false,
        }
    }

    pub const fn unique(columns: &'static [&'static str]) -> Self {
        Self {
            columns,
            unique: true,
        }
    }

    /// The conventional name of this index on `table`.
    pub fn name(&self, table: &str) -> String {
        if self.unique {
            unique_index_name(table, self.columns)
        } else {
            index_name(table, self.columns)
        }
    }

    pub fn to_ddl(&self, table: &str) -> Ddl {
        Ddl::CreateIndex {
            name: self.name(table),
            table: table.to_string(),
            columns: self.columns.iter().map(|c| c.to_string()).collect(),
            unique: self.unique,
        }
    }
}

/// An expected table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSpec {
    #[serde(rename = "tableName")]
    pub name: &'static str,
    /// Columns in declaration order.
    pub columns: &'static [ColumnSpec],
    pub primary_key: &'static [&'static str],
    #[serde(rename = "requiredIndexes")]
    pub indexes: &'static [IndexSpec],
}

impl TableSpec {
    pub const fn new(
        name: &'static str,
        columns: &'static [ColumnSpec],
        primary_key: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            columns,
            primary_key,
            indexes: &[],
        }
    }

    pub const fn with_indexes(self, indexes: &'static [IndexSpec]) -> Self {
        Self { indexes, ..self }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Names of all required indexes, in declaration order.
    pub fn index_names(&self) -> Vec<String> {
        self.indexes.iter().map(|idx| idx.name(self.name)).collect()
    }

    /// `CREATE TABLE IF NOT EXISTS` for this table, without its indexes.
    pub fn to_create_ddl(&self) -> Ddl {
        Ddl::CreateTable {
            table: self.name.to_string(),
            columns: self.columns.iter().map(ColumnSpec::to_column_def).collect(),
            primary_key: self.primary_key.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// A column as found in the live database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedColumn {
    pub name: String,
    /// `information_schema.columns.data_type`
    pub data_type: String,
    /// `information_schema.columns.udt_name`
    pub udt_name: String,
    pub nullable: bool,
    pub has_default: bool,
}

impl ObservedColumn {
    /// The column exactly as `spec` describes it.
    pub fn from_spec(spec: &ColumnSpec) -> Self {
        let (data_type, udt_name) = spec.pg_type.catalog_names();
        Self {
            name: spec.name.to_string(),
            data_type: data_type.to_string(),
            udt_name: udt_name.to_string(),
            nullable: spec.nullable,
            has_default: spec.has_default(),
        }
    }

    pub fn family(&self) -> TypeFamily {
        TypeFamily::from_catalog(&self.data_type, &self.udt_name)
    }

    /// Human-readable type, preferring the udt name for arrays and enums.
    pub fn display_type(&self) -> &str {
        match self.data_type.as_str() {
            "ARRAY" | "USER-DEFINED" => &self.udt_name,
            other => other,
        }
    }
}

/// An index as found in the live database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedIndex {
    pub name: String,
    /// Key columns in order. Expressions and keys with options are kept as
    /// written and never match a plain column.
    pub columns: Vec<String>,
    pub unique: bool,
    /// Has a `WHERE` clause.
    pub partial: bool,
}

impl ObservedIndex {
    /// The index `spec` creates on `table`.
    pub fn from_spec(table: &str, spec: &IndexSpec) -> Self {
        Self {
            name: spec.name(table),
            columns: spec.columns.iter().map(|c| c.to_string()).collect(),
            unique: spec.unique,
            partial: false,
        }
    }

    /// Read a `pg_indexes.indexdef`, e.g.
    /// `CREATE UNIQUE INDEX profiles_email_key ON public.profiles USING btree (email)`.
    pub fn from_definition(name: impl Into<String>, indexdef: &str) -> Self {
        let unique = indexdef
            .trim_start()
            .to_ascii_uppercase()
            .starts_with("CREATE UNIQUE INDEX");
        let keys_from = indexdef.find(" USING ").unwrap_or(0);
        let (columns, rest) = match indexdef[keys_from..].find('(') {
            Some(open) => split_keys(&indexdef[keys_from + open..]),
            None => (Vec::new(), ""),
        };
        Self {
            name: name.into(),
            columns,
            unique,
            partial: rest.to_ascii_uppercase().contains(" WHERE "),
        }
    }

    /// Whether this index does the job of `spec`: the same key columns in
    /// the same order, unique when `spec` is, and covering every row.
    pub fn covers(&self, spec: &IndexSpec) -> bool {
        !self.partial
            && (self.unique || !spec.unique)
            && self.columns.iter().map(String::as_str).eq(spec.columns.iter().copied())
    }

    /// The `indexdef` Postgres reports for this index on `table`.
    pub fn definition(&self, table: &str) -> String {
        format!(
            "CREATE {}INDEX {} ON public.{} USING btree ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            table,
            self.columns.join(", ")
        )
    }
}

/// Split the parenthesized key list at the start of `s` into its top-level
/// entries, returning them and whatever follows the closing parenthesis.
fn split_keys(s: &str) -> (Vec<String>, &str) {
    let mut keys = Vec::new();
    let mut depth = 0usize;
    let mut quoted = false;
    let mut start = 1;
    for (i, ch) in s.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            _ if quoted => {}
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    keys.push(unquote(s[start..i].trim()));
                    return (keys, &s[i + 1..]);
                }
            }
            ',' if depth == 1 => {
                keys.push(unquote(s[start..i].trim()));
                start = i + 1;
            }
            _ => {}
        }
    }
    (keys, "")
}

fn unquote(key: &str) -> String {
    match key.strip_prefix('"').and_then(|k| k.strip_suffix('"')) {
        Some(inner) if !inner.replace("\"\"", "").contains('"') => inner.replace("\"\"", "\""),
        _ => key.to_string(),
    }
}

/// A table as found in the live database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObservedTable {
    pub name: String,
    pub columns: Vec<ObservedColumn>,
    pub indexes: Vec<ObservedIndex>,
}

impl ObservedTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// The table exactly as `spec` describes it, including its indexes.
    pub fn from_spec(spec: &TableSpec) -> Self {
        Self {
            name: spec.name.to_string(),
            columns: spec.columns.iter().map(ObservedColumn::from_spec).collect(),
            indexes: spec
                .indexes
                .iter()
                .map(|idx| ObservedIndex::from_spec(spec.name, idx))
                .collect(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ObservedColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.iter().any(|i| i.name == name)
    }

    /// Whether some index on this table satisfies `spec`, under its
    /// conventional name or under any other name (a `UNIQUE` constraint's
    /// `<table>_<column>_key`, for instance).
    pub fn has_index_for(&self, spec: &IndexSpec) -> bool {
        self.has_index(&spec.name(&self.name)) || self.indexes.iter().any(|i| i.covers(spec))
    }
}

/// The live database shape, keyed by table name in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedSchema {
    pub tables: IndexMap<String, ObservedTable>,
    /// False when index information was not (or could not be) read.
    pub indexes_known: bool,
}

impl ObservedSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&ObservedTable> {
        self.tables.get(name)
    }

    /// Get or create the entry for `name`.
    pub fn table_mut(&mut self, name: &str) -> &mut ObservedTable {
        self.tables
            .entry(name.to_string())
            .or_insert_with(|| ObservedTable::new(name))
    }

    pub fn insert(&mut self, table: ObservedTable) {
        self.tables.insert(table.name.clone(), table);
    }
}
