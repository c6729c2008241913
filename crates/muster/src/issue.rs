//! Detected mismatches between the expected and the live schema.

use muster_db_schema::PgType;
use serde::{Serialize, Serializer};
use std::fmt;

/// Coarse classification of an [`Issue`], as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingColumn,
    WrongType,
    MissingTable,
    MissingIndex,
    Other,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueKind::MissingColumn => "missing_column",
            IssueKind::WrongType => "wrong_type",
            IssueKind::MissingTable => "missing_table",
            IssueKind::MissingIndex => "missing_index",
            IssueKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// How likely an issue is to break the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(s)
    }
}

/// A single detected mismatch.
///
/// Table-level variants carry everything the remediator needs; the last two
/// are global and not tied to any table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// The table does not exist at all.
    MissingTable { table: String },
    /// Queries that reference this column will fail.
    MissingColumn {
        table: String,
        column: String,
        expected: PgType,
    },
    /// The column exists with a type outside the expected family.
    WrongType {
        table: String,
        column: String,
        expected: PgType,
        actual: String,
    },
    /// The column's nullability differs from the rule.
    Nullability {
        table: String,
        column: String,
        expected_nullable: bool,
    },
    /// A required index is absent.
    MissingIndex {
        table: String,
        index: String,
        columns: Vec<String>,
        unique: bool,
    },
    /// The SQL function used to reach the database does not exist.
    ChannelUnavailable { function: String },
    /// Anything else that prevented part of the scan.
    Global { message: String, severity: Severity },
}

impl Issue {
    pub fn kind(&self) -> IssueKind {
        match self {
            Issue::MissingTable { .. } => IssueKind::MissingTable,
            Issue::MissingColumn { .. } => IssueKind::MissingColumn,
            Issue::WrongType { .. } => IssueKind::WrongType,
            Issue::MissingIndex { .. } => IssueKind::MissingIndex,
            Issue::Nullability { .. } | Issue::ChannelUnavailable { .. } | Issue::Global { .. } => {
                IssueKind::Other
            }
        }
    }

    /// Missing structure ranks above a wrong type, which ranks above nullability.
    pub fn severity(&self) -> Severity {
        match self {
            Issue::MissingTable { .. }
            | Issue::MissingColumn { .. }
            | Issue::ChannelUnavailable { .. } => Severity::High,
            Issue::WrongType { .. } => Severity::Medium,
            Issue::Nullability { .. } | Issue::MissingIndex { .. } => Severity::Low,
            Issue::Global { severity, .. } => *severity,
        }
    }

    /// `None` for global issues.
    pub fn table_name(&self) -> Option<&str> {
        match self {
            Issue::MissingTable { table }
            | Issue::MissingColumn { table, .. }
            | Issue::WrongType { table, .. }
            | Issue::Nullability { table, .. }
            | Issue::MissingIndex { table, .. } => Some(table),
            Issue::ChannelUnavailable { .. } | Issue::Global { .. } => None,
        }
    }

    pub fn column_name(&self) -> Option<&str> {
        match self {
            Issue::MissingColumn { column, .. }
            | Issue::WrongType { column, .. }
            | Issue::Nullability { column, .. } => Some(column),
            Issue::MissingTable { .. }
            | Issue::MissingIndex { .. }
            | Issue::ChannelUnavailable { .. }
            | Issue::Global { .. } => None,
        }
    }

    pub fn is_global(&self) -> bool {
        self.table_name().is_none()
    }

    pub fn description(&self) -> String {
        match self {
            Issue::MissingTable { table } => format!("Table {} does not exist", table),
            Issue::MissingColumn {
                table,
                column,
                expected,
            } => format!("Column {}.{} ({}) is missing", table, column, expected),
            Issue::WrongType {
                table,
                column,
                expected,
                actual,
            } => format!(
                "Column {}.{} has type {}, expected {}",
                table, column, actual, expected
            ),
            Issue::Nullability {
                table,
                column,
                expected_nullable,
            } => {
                let (is, should) = if *expected_nullable {
                    ("NOT NULL", "nullable")
                } else {
                    ("nullable", "NOT NULL")
                };
                format!("Column {}.{} is {}, expected {}", table, column, is, should)
            }
            Issue::MissingIndex {
                table,
                index,
                columns,
                unique,
            } => {
                let unique = if *unique { "Unique index" } else { "Index" };
                format!(
                    "{} {} on {} ({}) is missing",
                    unique,
                    index,
                    table,
                    columns.join(", ")
                )
            }
            Issue::ChannelUnavailable { function } => format!(
                "{} RPC not available; the database cannot be inspected or repaired",
                function
            ),
            Issue::Global { message, .. } => message.clone(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.kind(), self.description())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueWire<'a> {
    #[serde(rename = "type")]
    kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    table_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    column_name: Option<&'a str>,
    description: String,
    severity: Severity,
}

impl Serialize for Issue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        IssueWire {
            kind: self.kind(),
            table_name: self.table_name(),
            column_name: self.column_name(),
            description: self.description(),
            severity: self.severity(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_column_wire_shape() {
        let issue = Issue::MissingColumn {
            table: "user_roles".into(),
            column: "assigned_at".into(),
            expected: PgType::Timestamptz,
        };
        assert_eq!(
            serde_json::to_value(&issue).unwrap(),
            json!({
                "type": "missing_column",
                "tableName": "user_roles",
                "columnName": "assigned_at",
                "description": "Column user_roles.assigned_at (TIMESTAMPTZ) is missing",
                "severity": "high",
            })
        );
    }

    #[test]
    fn test_global_issue_omits_table() {
        let issue = Issue::ChannelUnavailable {
            function: "exec_sql".into(),
        };
        let value = serde_json::to_value(&issue).unwrap();
        assert_eq!(value["type"], json!("other"));
        assert_eq!(value["severity"], json!("high"));
        assert!(value.get("tableName").is_none());
        assert!(value.get("columnName").is_none());
        assert!(issue.is_global());
    }

    #[test]
    fn test_severity_grading() {
        let missing = Issue::MissingColumn {
            table: "t".into(),
            column: "c".into(),
            expected: PgType::Text,
        };
        let wrong = Issue::WrongType {
            table: "t".into(),
            column: "c".into(),
            expected: PgType::Text,
            actual: "integer".into(),
        };
        let nullability = Issue::Nullability {
            table: "t".into(),
            column: "c".into(),
            expected_nullable: false,
        };
        assert!(missing.severity() > wrong.severity());
        assert!(wrong.severity() > nullability.severity());
        assert_eq!(nullability.kind(), IssueKind::Other);
    }

    #[test]
    fn test_nullability_description() {
        let issue = Issue::Nullability {
            table: "profiles".into(),
            column: "email".into(),
            expected_nullable: false,
        };
        assert_eq!(
            issue.description(),
            "Column profiles.email is nullable, expected NOT NULL"
        );
        assert_eq!(
            issue.to_string(),
            "[low] other: Column profiles.email is nullable, expected NOT NULL"
        );
    }
}
