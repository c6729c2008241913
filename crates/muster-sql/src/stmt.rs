//! DDL statements.

use crate::Ident;
use std::fmt;

/// A column as it appears in `ADD COLUMN` or `CREATE TABLE`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnDef {
    pub name: String,
    /// SQL type as rendered, e.g. `TIMESTAMPTZ` or `TEXT[]`.
    pub sql_type: String,
    pub not_null: bool,
    /// Default expression, rendered verbatim.
    pub default: Option<String>,
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", Ident(&self.name), self.sql_type)?;
        if self.not_null {
            write!(f, " NOT NULL")?;
        }
        if let Some(default) = &self.default {
            write!(f, " DEFAULT {}", default)?;
        }
        Ok(())
    }
}

/// A corrective DDL statement.
///
/// This is the complete set of shapes automatic remediation can produce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ddl {
    /// `ALTER TABLE ... ADD COLUMN IF NOT EXISTS ...`
    AddColumn { table: String, column: ColumnDef },
    /// `CREATE TABLE IF NOT EXISTS ...`
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
    },
    /// `CREATE [UNIQUE] INDEX IF NOT EXISTS ...`
    CreateIndex {
        name: String,
        table: String,
        columns: Vec<String>,
        unique: bool,
    },
}

impl Ddl {
    /// Table the statement touches.
    pub fn table(&self) -> &str {
        match self {
            Ddl::AddColumn { table, .. }
            | Ddl::CreateTable { table, .. }
            | Ddl::CreateIndex { table, .. } => table,
        }
    }

    /// One-line account of the change, used in fix reports.
    pub fn describe(&self) -> String {
        match self {
            Ddl::AddColumn { table, column } => {
                format!("Added column {}.{} ({})", table, column.name, column.sql_type)
            }
            Ddl::CreateTable { table, columns, .. } => {
                format!("Created table {} ({} columns)", table, columns.len())
            }
            Ddl::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                let unique = if *unique { "unique " } else { "" };
                format!(
                    "Created {}index {} on {} ({})",
                    unique,
                    name,
                    table,
                    columns.join(", ")
                )
            }
        }
    }
}

impl fmt::Display for Ddl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ddl::AddColumn { table, column } => {
                write!(
                    f,
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
                    Ident(table),
                    column
                )
            }
            Ddl::CreateTable {
                table,
                columns,
                primary_key,
            } => {
                // Composite keys need a table constraint; a single key column goes inline.
                let composite = primary_key.len() > 1;
                writeln!(f, "CREATE TABLE IF NOT EXISTS {} (", Ident(table))?;

                let mut parts: Vec<String> = columns
                    .iter()
                    .map(|col| {
                        let inline_pk = !composite && primary_key.iter().any(|k| k == &col.name);
                        if inline_pk {
                            let mut def = format!("{} {} PRIMARY KEY", Ident(&col.name), col.sql_type);
                            if let Some(default) = &col.default {
                                def.push_str(&format!(" DEFAULT {}", default));
                            }
                            format!("    {}", def)
                        } else {
                            format!("    {}", col)
                        }
                    })
                    .collect();

                if composite {
                    let keys: Vec<String> = primary_key.iter().map(|k| Ident(k).to_string()).collect();
                    parts.push(format!("    PRIMARY KEY ({})", keys.join(", ")));
                }

                write!(f, "{}\n);", parts.join(",\n"))
            }
            Ddl::CreateIndex {
                name,
                table,
                columns,
                unique,
            } => {
                let unique = if *unique { "UNIQUE " } else { "" };
                let cols: Vec<String> = columns.iter().map(|c| Ident(c).to_string()).collect();
                write!(
                    f,
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});",
                    unique,
                    Ident(name),
                    Ident(table),
                    cols.join(", ")
                )
            }
        }
    }
}
