//! Human-readable output.

use muster::{FixResult, Issue, RuleSet, Severity, VerificationReport};
use owo_colors::OwoColorize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy)]
pub struct Style {
    pub color: bool,
}

impl Style {
    fn severity(&self, severity: Severity) -> String {
        let label = format!("{:<6}", severity.to_string());
        if !self.color {
            return label;
        }
        match severity {
            Severity::High => label.red().bold().to_string(),
            Severity::Medium => label.yellow().to_string(),
            Severity::Low => label.dimmed().to_string(),
        }
    }

    fn good(&self, s: &str) -> String {
        if self.color { s.green().to_string() } else { s.to_string() }
    }

    fn bad(&self, s: &str) -> String {
        if self.color { s.red().to_string() } else { s.to_string() }
    }

    fn bold(&self, s: &str) -> String {
        if self.color { s.bold().to_string() } else { s.to_string() }
    }
}

fn issue_line(out: &mut String, style: Style, issue: &Issue) {
    let _ = writeln!(
        out,
        "    {} {:<15} {}",
        style.severity(issue.severity()),
        issue.kind().to_string(),
        issue.description()
    );
}

pub fn report(report: &VerificationReport, style: Style) -> String {
    let mut out = String::new();

    if let Some(error) = &report.error {
        let _ = writeln!(out, "{} {}\n", style.bad("verification failed:"), error);
    }

    let width = report
        .tables
        .iter()
        .map(|t| t.table_name.len())
        .max()
        .unwrap_or(0);
    for table in &report.tables {
        if table.issues.is_empty() {
            let _ = writeln!(out, "  {:<width$}  {}", table.table_name, style.good("ok"));
            continue;
        }
        let count = match table.issues.len() {
            1 => "1 issue".to_string(),
            n => format!("{} issues", n),
        };
        let _ = writeln!(out, "  {:<width$}  {}", table.table_name, style.bad(&count));
        for issue in &table.issues {
            issue_line(&mut out, style, issue);
        }
    }

    if !report.global_issues.is_empty() {
        let _ = writeln!(out, "  {}", style.bold("global"));
        for issue in &report.global_issues {
            issue_line(&mut out, style, issue);
        }
    }

    let _ = writeln!(
        out,
        "\n{} tables checked, {} issue(s)",
        report.tables.len(),
        report.issue_count()
    );
    out
}

pub fn fix(result: &FixResult, style: Style) -> String {
    let mut out = String::new();
    for line in &result.fixed {
        let _ = writeln!(out, "  {} {}", style.good("fixed"), line);
    }
    for line in &result.errors {
        let _ = writeln!(out, "  {} {}", style.bad("error"), line);
    }
    for line in &result.skipped {
        let _ = writeln!(out, "  {} {}", style.bold("manual"), line);
    }
    if result.fixed.is_empty() && result.errors.is_empty() && result.skipped.is_empty() {
        let _ = writeln!(out, "  nothing to fix");
    }

    let status = if result.success {
        style.good("done")
    } else {
        style.bad("aborted")
    };
    let _ = writeln!(
        out,
        "\n{}: {} fixed, {} error(s)",
        status,
        result.fixed.len(),
        result.errors.len()
    );
    out
}

pub fn rules(rules: &RuleSet) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Rules ({} tables):", rules.len());

    for table in rules.tables() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  {} ({} columns)", table.name, table.columns.len());
        for col in table.columns {
            let mut attrs = Vec::new();
            if table.primary_key.contains(&col.name) {
                attrs.push("PK".to_string());
            }
            if !col.nullable {
                attrs.push("NOT NULL".to_string());
            }
            if let Some(default) = col.default {
                attrs.push(format!("DEFAULT {}", default));
            }

            let attrs_str = if attrs.is_empty() {
                String::new()
            } else {
                format!(" [{}]", attrs.join(", "))
            };
            let _ = writeln!(out, "    {}: {}{}", col.name, col.pg_type, attrs_str);
        }
        for index in table.indexes {
            let unique = if index.unique { " UNIQUE" } else { "" };
            let _ = writeln!(
                out,
                "    index {} ({}){}",
                index.name(table.name),
                index.columns.join(", "),
                unique
            );
        }
    }
    out
}
