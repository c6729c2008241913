//! Schema verification and remediation for the recruitment platform's
//! hosted Postgres database.
//!
//! The workflow is small and linear:
//!
//! 1. [`Inspector`] reads the live catalog through a [`Channel`].
//! 2. [`verify`] diffs it against the compiled-in [`RuleSet`], producing
//!    typed [`Issue`]s per table plus global issues.
//! 3. [`Remediator`] turns issues into idempotent DDL ([`muster_sql::Ddl`])
//!    and applies it one statement at a time, reporting each outcome in a
//!    [`FixResult`].
//!
//! Nothing is cached: every [`Auditor::run`] re-reads the catalog.
//!
//! ```ignore
//! let channel = PgChannel::connect(&url, 4)?.with_rpc("exec_sql");
//! let rules = RuleSet::application();
//!
//! let report = Auditor::new(&channel, &rules).run().await;
//! if !report.is_clean() {
//!     let result = Remediator::new(&channel, &rules)
//!         .fix_all(&report.all_issues())
//!         .await;
//!     println!("fixed {} issue(s)", result.fixed.len());
//! }
//! ```

mod channel;
mod error;
mod inspect;
mod issue;
mod remediate;
pub mod rules;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod verify;

pub use channel::{BoxFuture, Channel, ChannelError, JsonRow, PgChannel};
pub use error::{Error, UnknownTable};
pub use inspect::Inspector;
pub use issue::{Issue, IssueKind, Severity};
pub use remediate::{FixResult, Plan, Remediator, plan};
pub use rules::RuleSet;
pub use verify::{Auditor, TableReport, VerificationReport, verify};

pub use muster_db_schema::{
    ColumnSpec, IndexSpec, ObservedColumn, ObservedIndex, ObservedSchema, ObservedTable, PgType, TableSpec,
    TypeFamily,
};
pub use muster_sql::{ColumnDef, Ddl, quote_ident};

/// Default Postgres schema that holds the application's tables.
pub const DEFAULT_SCHEMA: &str = "public";

/// Result type for muster operations.
pub type Result<T> = std::result::Result<T, Error>;
