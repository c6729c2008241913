//! The compiled-in Rule Set: the tables and columns the recruitment
//! platform's pages and API routes expect to find.
//!
//! Declaration order here is report order.

use muster_db_schema::{ColumnSpec, IndexSpec, PgType, TableSpec};
use serde::Serialize;

const fn col(name: &'static str, pg_type: PgType) -> ColumnSpec {
    ColumnSpec::new(name, pg_type)
}

const fn id() -> ColumnSpec {
    ColumnSpec::new("id", PgType::Uuid).default("gen_random_uuid()")
}

const fn created_at() -> ColumnSpec {
    ColumnSpec::new("created_at", PgType::Timestamptz).default("now()")
}

/// Tables expected by the application.
pub static APPLICATION_TABLES: &[TableSpec] = &[
    TableSpec::new(
        "profiles",
        &[
            col("id", PgType::Uuid),
            col("email", PgType::Text),
            col("full_name", PgType::Text).nullable(),
            col("avatar_url", PgType::Text).nullable(),
            col("is_admin", PgType::Boolean).default("false"),
            created_at(),
            col("updated_at", PgType::Timestamptz).nullable(),
        ],
        &["id"],
    )
    .with_indexes(&[IndexSpec::unique(&["email"])]),
    TableSpec::new(
        "user_roles",
        &[
            id(),
            col("user_id", PgType::Uuid),
            col("role", PgType::Text),
            col("assigned_at", PgType::Timestamptz).default("now()"),
            col("is_active", PgType::Boolean).default("true"),
        ],
        &["id"],
    )
    .with_indexes(&[IndexSpec::new(&["user_id"])]),
    TableSpec::new(
        "donations",
        &[
            id(),
            col("user_id", PgType::Uuid).nullable(),
            col("amount_cents", PgType::BigInt),
            col("currency", PgType::Text).default("'USD'"),
            col("donor_name", PgType::Text).nullable(),
            col("message", PgType::Text).nullable(),
            col("is_anonymous", PgType::Boolean).default("false"),
            col("payment_reference", PgType::Text).nullable(),
            created_at(),
        ],
        &["id"],
    )
    .with_indexes(&[IndexSpec::new(&["user_id"]), IndexSpec::new(&["created_at"])]),
    TableSpec::new(
        "leaderboard_entries",
        &[
            id(),
            col("user_id", PgType::Uuid),
            col("display_name", PgType::Text),
            col("total_donated_cents", PgType::BigInt).default("0"),
            col("points", PgType::Integer).default("0"),
            col("rank", PgType::Integer).nullable(),
            col("updated_at", PgType::Timestamptz).default("now()"),
        ],
        &["id"],
    )
    .with_indexes(&[IndexSpec::unique(&["user_id"])]),
    TableSpec::new(
        "trivia_questions",
        &[
            id(),
            col("question", PgType::Text),
            col("options", PgType::Jsonb),
            col("correct_option", PgType::Integer),
            col("category", PgType::Text).nullable(),
            col("difficulty", PgType::Text).default("'easy'"),
            col("is_active", PgType::Boolean).default("true"),
            created_at(),
        ],
        &["id"],
    ),
    TableSpec::new(
        "trivia_attempts",
        &[
            id(),
            col("user_id", PgType::Uuid),
            col("question_id", PgType::Uuid),
            col("selected_option", PgType::Integer),
            col("is_correct", PgType::Boolean),
            col("attempted_at", PgType::Timestamptz).default("now()"),
        ],
        &["id"],
    )
    .with_indexes(&[IndexSpec::unique(&["user_id", "question_id"])]),
    TableSpec::new(
        "challenges",
        &[
            id(),
            col("title", PgType::Text),
            col("description", PgType::Text).nullable(),
            col("points", PgType::Integer).default("0"),
            col("starts_at", PgType::Timestamptz).nullable(),
            col("ends_at", PgType::Timestamptz).nullable(),
            col("is_active", PgType::Boolean).default("true"),
            created_at(),
        ],
        &["id"],
    ),
    TableSpec::new(
        "challenge_completions",
        &[
            id(),
            col("challenge_id", PgType::Uuid),
            col("user_id", PgType::Uuid),
            col("points_awarded", PgType::Integer).default("0"),
            col("completed_at", PgType::Timestamptz).default("now()"),
        ],
        &["id"],
    )
    .with_indexes(&[IndexSpec::unique(&["challenge_id", "user_id"])]),
    TableSpec::new(
        "referrals",
        &[
            id(),
            col("recruiter_id", PgType::Uuid),
            col("referral_code", PgType::Text),
            col("referred_email", PgType::Text).nullable(),
            col("referred_user_id", PgType::Uuid).nullable(),
            col("status", PgType::Text).default("'pending'"),
            created_at(),
            col("converted_at", PgType::Timestamptz).nullable(),
        ],
        &["id"],
    )
    .with_indexes(&[
        IndexSpec::new(&["recruiter_id"]),
        IndexSpec::unique(&["referral_code"]),
    ]),
    TableSpec::new(
        "daily_briefings",
        &[
            id(),
            col("briefing_date", PgType::Date),
            col("title", PgType::Text),
            col("content", PgType::Text),
            col("published", PgType::Boolean).default("false"),
            created_at(),
        ],
        &["id"],
    )
    .with_indexes(&[IndexSpec::unique(&["briefing_date"])]),
    TableSpec::new(
        "briefing_streaks",
        &[
            col("user_id", PgType::Uuid),
            col("current_streak", PgType::Integer).default("0"),
            col("longest_streak", PgType::Integer).default("0"),
            col("last_briefing_date", PgType::Date).nullable(),
            col("updated_at", PgType::Timestamptz).default("now()"),
        ],
        &["user_id"],
    ),
    TableSpec::new(
        "admin_logs",
        &[
            id(),
            col("actor_id", PgType::Uuid).nullable(),
            col("action", PgType::Text),
            col("level", PgType::Text).default("'info'"),
            col("details", PgType::Jsonb).nullable(),
            created_at(),
        ],
        &["id"],
    )
    .with_indexes(&[IndexSpec::new(&["created_at"])]),
];

/// An ordered set of expected tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RuleSet {
    tables: &'static [TableSpec],
}

impl RuleSet {
    pub const fn new(tables: &'static [TableSpec]) -> Self {
        Self { tables }
    }

    /// The application's rule set.
    pub const fn application() -> Self {
        Self::new(APPLICATION_TABLES)
    }

    pub fn tables(&self) -> &'static [TableSpec] {
        self.tables
    }

    pub fn table(&self, name: &str) -> Option<&'static TableSpec> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// A rule set containing only `name`, for scoped verification.
    pub fn only(&self, name: &str) -> Option<RuleSet> {
        self.table(name)
            .map(|spec| RuleSet::new(std::slice::from_ref(spec)))
    }

    /// Whether verifying these rules needs index information.
    pub fn requires_indexes(&self) -> bool {
        self.tables.iter().any(|t| !t.indexes.is_empty())
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::application()
    }
}
