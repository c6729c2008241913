//! Verification: diff the live schema against the rule set.

use crate::{Channel, ChannelError, DEFAULT_SCHEMA, Inspector, Issue, RuleSet, Severity};
use muster_db_schema::{ObservedSchema, ObservedTable, TableSpec};
use serde::Serialize;
use std::fmt;

/// Issues found for one expected table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReport {
    pub table_name: String,
    pub issues: Vec<Issue>,
}

/// The outcome of one verification run.
///
/// `success` is false only when the catalog could not be read at all; in
/// that case `tables` is empty and `error` carries the raw message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// One entry per rule table, in rule order.
    pub tables: Vec<TableReport>,
    pub global_issues: Vec<Issue>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationReport {
    /// A report for a scan that could not read the catalog.
    pub fn failed(err: &ChannelError) -> Self {
        let issue = match err {
            ChannelError::RpcUnavailable { function } => Issue::ChannelUnavailable {
                function: function.clone(),
            },
            other => Issue::Global {
                message: format!("Schema inspection failed: {}", other),
                severity: Severity::High,
            },
        };
        Self {
            tables: Vec::new(),
            global_issues: vec![issue],
            success: false,
            error: Some(err.to_string()),
        }
    }

    pub fn issue_count(&self) -> usize {
        self.tables.iter().map(|t| t.issues.len()).sum::<usize>() + self.global_issues.len()
    }

    pub fn is_clean(&self) -> bool {
        self.issue_count() == 0
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    /// Every issue, table issues first (in report order), then global ones.
    pub fn all_issues(&self) -> Vec<Issue> {
        self.tables
            .iter()
            .flat_map(|t| t.issues.iter())
            .chain(self.global_issues.iter())
            .cloned()
            .collect()
    }

    /// The most severe issue in the report, if any.
    pub fn max_severity(&self) -> Option<Severity> {
        self.tables
            .iter()
            .flat_map(|t| t.issues.iter())
            .chain(self.global_issues.iter())
            .map(Issue::severity)
            .max()
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            writeln!(f, "Verification failed: {}\n", error)?;
        }
        if self.is_clean() {
            writeln!(f, "No schema issues found.")?;
            return Ok(());
        }

        writeln!(f, "Schema issues found:\n")?;
        for table in self.tables.iter().filter(|t| !t.issues.is_empty()) {
            writeln!(f, "  {}:", table.table_name)?;
            for issue in &table.issues {
                writeln!(f, "    {}", issue)?;
            }
        }
        if !self.global_issues.is_empty() {
            writeln!(f, "  (global):")?;
            for issue in &self.global_issues {
                writeln!(f, "    {}", issue)?;
            }
        }
        Ok(())
    }
}

/// Compare `observed` against `rules`.
///
/// Tables come out in rule order and issues in column-declaration order.
/// Columns and tables that exist but are not in the rules are not reported.
/// Index checks only run when `observed.indexes_known` is set.
pub fn verify(rules: &RuleSet, observed: &ObservedSchema) -> VerificationReport {
    let tables = rules
        .tables()
        .iter()
        .map(|spec| TableReport {
            table_name: spec.name.to_string(),
            issues: match observed.table(spec.name) {
                Some(table) => check_table(spec, table, observed.indexes_known),
                None => vec![Issue::MissingTable {
                    table: spec.name.to_string(),
                }],
            },
        })
        .collect();

    VerificationReport {
        tables,
        global_issues: Vec::new(),
        success: true,
        error: None,
    }
}

fn check_table(spec: &TableSpec, table: &ObservedTable, indexes_known: bool) -> Vec<Issue> {
    let mut issues = Vec::new();

    for expected in spec.columns {
        let Some(actual) = table.column(expected.name) else {
            issues.push(Issue::MissingColumn {
                table: spec.name.to_string(),
                column: expected.name.to_string(),
                expected: expected.pg_type,
            });
            continue;
        };

        if !expected.pg_type.family().accepts(actual.family()) {
            issues.push(Issue::WrongType {
                table: spec.name.to_string(),
                column: expected.name.to_string(),
                expected: expected.pg_type,
                actual: actual.display_type().to_string(),
            });
        }

        if actual.nullable != expected.nullable {
            issues.push(Issue::Nullability {
                table: spec.name.to_string(),
                column: expected.name.to_string(),
                expected_nullable: expected.nullable,
            });
        }
    }

    if indexes_known {
        for index in spec.indexes {
            if !table.has_index_for(index) {
                issues.push(Issue::MissingIndex {
                    table: spec.name.to_string(),
                    index: index.name(spec.name),
                    columns: index.columns.iter().map(|c| c.to_string()).collect(),
                    unique: index.unique,
                });
            }
        }
    }

    issues
}

/// Runs a fresh inspection and verifies it.
pub struct Auditor<'a, C: Channel + ?Sized> {
    channel: &'a C,
    rules: &'a RuleSet,
    schema: &'a str,
}

impl<'a, C: Channel + ?Sized> Auditor<'a, C> {
    pub fn new(channel: &'a C, rules: &'a RuleSet) -> Self {
        Self {
            channel,
            rules,
            schema: DEFAULT_SCHEMA,
        }
    }

    /// Inspect a schema other than `public`.
    pub fn in_schema(mut self, schema: &'a str) -> Self {
        self.schema = schema;
        self
    }

    /// Inspect the catalog and diff it against the rules.
    ///
    /// Never fails: an unreadable catalog becomes a global issue with
    /// `success: false`, and an unreadable index list becomes a global issue
    /// while column diagnostics are still reported.
    pub async fn run(&self) -> VerificationReport {
        let inspector = Inspector::new(self.channel, self.schema);

        let mut observed = match inspector.inspect_columns().await {
            Ok(observed) => observed,
            Err(err) => {
                tracing::warn!(schema = self.schema, error = %err, "schema inspection failed");
                return VerificationReport::failed(&err);
            }
        };

        let mut index_failure = None;
        if self.rules.requires_indexes() {
            if let Err(err) = inspector.inspect_indexes(&mut observed).await {
                tracing::warn!(schema = self.schema, error = %err, "index inspection failed");
                index_failure = Some(Issue::Global {
                    message: format!("Index inspection failed: {}", err),
                    severity: Severity::Medium,
                });
            }
        }

        let mut report = verify(self.rules, &observed);
        report.global_issues.extend(index_failure);

        tracing::info!(
            schema = self.schema,
            tables = report.tables.len(),
            issues = report.issue_count(),
            "schema verified"
        );
        report
    }
}
