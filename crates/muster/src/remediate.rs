//! Remediation: turn issues into DDL and apply it.
//!
//! Every generated statement is idempotent (`IF NOT EXISTS`), so applying a
//! stale issue list, or two operators fixing at once, converges instead of
//! failing. Statements run one call at a time with no transaction; each
//! outcome is reported on its own.

use crate::{Auditor, Channel, DEFAULT_SCHEMA, Issue, RuleSet, UnknownTable};
use muster_sql::Ddl;
use serde::Serialize;

/// Outcome of a remediation request.
///
/// `success` means the run finished; individual statement failures are in
/// `errors` and do not clear it. Only a lost channel does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub success: bool,
    /// What was changed, one line per applied statement.
    pub fixed: Vec<String>,
    pub errors: Vec<String>,
    /// Issues that need an operator.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl FixResult {
    /// A completed run that changed nothing.
    pub fn nothing_to_do() -> Self {
        Self {
            success: true,
            fixed: Vec::new(),
            errors: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// A run that could not start or could not finish.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            fixed: Vec::new(),
            errors: vec![message.into()],
            skipped: Vec::new(),
        }
    }
}

/// The statements that would fix a list of issues.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Deduplicated, in issue order.
    pub steps: Vec<Ddl>,
    /// Issues with no automatic fix.
    pub skipped: Vec<String>,
    /// Issues that could not be planned.
    pub errors: Vec<String>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(&mut self, step: Ddl) {
        if !self.steps.contains(&step) {
            self.steps.push(step);
        }
    }
}

/// Plan the DDL that resolves `issues` under `rules`.
///
/// Column types, nullability and defaults come from the rules, not from the
/// issue, so a tampered or stale issue can only ever produce DDL the rules
/// already describe. A `NOT NULL` column without a default is added to an
/// existing table as nullable, since its rows would otherwise violate the
/// constraint; verification then reports the nullability for an operator.
pub fn plan(rules: &RuleSet, issues: &[Issue]) -> Plan {
    let mut plan = Plan::default();

    for issue in issues {
        match issue {
            Issue::MissingTable { table } => match rules.table(table) {
                Some(spec) => {
                    plan.push(spec.to_create_ddl());
                    for index in spec.indexes {
                        plan.push(index.to_ddl(spec.name));
                    }
                }
                None => plan.errors.push(unknown_table(table)),
            },
            Issue::MissingColumn { table, column, .. } => {
                let Some(spec) = rules.table(table) else {
                    plan.errors.push(unknown_table(table));
                    continue;
                };
                match spec.column(column) {
                    Some(col) => plan.push(Ddl::AddColumn {
                        table: spec.name.to_string(),
                        column: col.to_added_column_def(),
                    }),
                    None => plan.errors.push(format!(
                        "Column {}.{} is not part of the rule set",
                        table, column
                    )),
                }
            }
            Issue::MissingIndex { table, index, .. } => {
                let Some(spec) = rules.table(table) else {
                    plan.errors.push(unknown_table(table));
                    continue;
                };
                match spec.indexes.iter().find(|i| i.name(spec.name) == *index) {
                    Some(idx) => plan.push(idx.to_ddl(spec.name)),
                    None => plan.errors.push(format!(
                        "Index {} on {} is not part of the rule set",
                        index, table
                    )),
                }
            }
            Issue::WrongType { .. }
            | Issue::Nullability { .. }
            | Issue::ChannelUnavailable { .. }
            | Issue::Global { .. } => plan.skipped.push(issue.description()),
        }
    }

    plan
}

fn unknown_table(table: &str) -> String {
    format!("Table {} is not part of the rule set", table)
}

/// Applies corrective DDL through a [`Channel`].
pub struct Remediator<'a, C: Channel + ?Sized> {
    channel: &'a C,
    rules: &'a RuleSet,
    schema: &'a str,
}

impl<'a, C: Channel + ?Sized> Remediator<'a, C> {
    pub fn new(channel: &'a C, rules: &'a RuleSet) -> Self {
        Self {
            channel,
            rules,
            schema: DEFAULT_SCHEMA,
        }
    }

    /// Schema the re-verification in [`Self::fix_table`] inspects.
    ///
    /// Generated DDL uses unqualified table names and relies on the
    /// connection's `search_path`.
    pub fn in_schema(mut self, schema: &'a str) -> Self {
        self.schema = schema;
        self
    }

    /// Re-verify one table and fix what is missing.
    ///
    /// Fails only when `table` is not in the rule set; database trouble is
    /// reported inside the [`FixResult`].
    pub async fn fix_table(&self, table: &str) -> Result<FixResult, UnknownTable> {
        let scoped = self
            .rules
            .only(table)
            .ok_or_else(|| UnknownTable(table.to_string()))?;

        let report = Auditor::new(self.channel, &scoped)
            .in_schema(self.schema)
            .run()
            .await;
        if !report.success {
            let message = report
                .error
                .unwrap_or_else(|| "schema inspection failed".to_string());
            return Ok(FixResult::failed(message));
        }

        Ok(self.apply(plan(&scoped, &report.all_issues())).await)
    }

    /// Fix a caller-supplied issue list without re-verifying it.
    ///
    /// An empty list makes no channel calls.
    pub async fn fix_all(&self, issues: &[Issue]) -> FixResult {
        if issues.is_empty() {
            return FixResult::nothing_to_do();
        }
        self.apply(plan(self.rules, issues)).await
    }

    /// Execute operator-supplied SQL verbatim.
    ///
    /// Nothing is validated. A database error is returned in `errors`.
    pub async fn run_custom_fix(&self, sql: &str) -> FixResult {
        tracing::warn!(sql, "executing operator-supplied SQL");
        match self.channel.execute(sql).await {
            Ok(()) => FixResult {
                fixed: vec![format!("Executed custom SQL: {}", sql)],
                ..FixResult::nothing_to_do()
            },
            Err(err) => {
                tracing::error!(error = %err, "operator-supplied SQL failed");
                FixResult::failed(err.to_string())
            }
        }
    }

    async fn apply(&self, plan: Plan) -> FixResult {
        let mut result = FixResult {
            errors: plan.errors,
            skipped: plan.skipped,
            ..FixResult::nothing_to_do()
        };

        for step in &plan.steps {
            let sql = step.to_string();
            match self.channel.execute(&sql).await {
                Ok(()) => {
                    let done = step.describe();
                    tracing::info!(table = step.table(), "{}", done);
                    result.fixed.push(done);
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(table = step.table(), error = %err, "remediation aborted");
                    result.errors.push(format!("{}: {}", sql, err));
                    result.success = false;
                    break;
                }
                Err(err) => {
                    tracing::warn!(table = step.table(), error = %err, "fix failed");
                    result.errors.push(format!("{}: {}", sql, err));
                }
            }
        }

        result
    }
}
