//! SQL quoting and the DDL statements muster is allowed to emit.
//!
//! Corrective SQL is built as a [`Ddl`] value and rendered with `Display`.
//! Every shape renders with `IF NOT EXISTS`, so applying the same statement
//! twice converges instead of failing.

mod stmt;
pub use stmt::*;

/// Postgres truncates identifiers longer than this many bytes.
pub const PG_IDENT_MAX: usize = 63;

/// A PostgreSQL string literal wrapper.
///
/// Display writes the value escaped and quoted with single quotes.
///
/// # Example
/// ```
/// use muster_sql::Lit;
/// assert_eq!(format!("{}", Lit("public")), "'public'");
/// assert_eq!(format!("{}", Lit("it's")), "'it''s'");
/// ```
pub struct Lit<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Lit<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "'")?;
        for c in self.0.as_ref().chars() {
            if c == '\'' {
                write!(f, "''")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "'")
    }
}

/// A PostgreSQL identifier wrapper.
///
/// Display writes the value escaped and quoted with double quotes.
///
/// # Example
/// ```
/// use muster_sql::Ident;
/// assert_eq!(format!("{}", Ident("user_roles")), "\"user_roles\"");
/// assert_eq!(format!("{}", Ident("bla\"h")), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> std::fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                write!(f, "\"\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    }
}

/// Escape a string literal for SQL.
pub fn escape_string(s: &str) -> String {
    format!("{}", Lit(s))
}

/// Quote a PostgreSQL identifier.
///
/// Always quotes, so reserved words like `user` or `role` are safe as
/// table and column names. Doubles any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("{}", Ident(name))
}

/// Generate a standard index name for a table and columns.
///
/// Uses the convention `idx_{table}_{columns}` where columns are joined by underscore.
///
/// # Examples
///
/// ```
/// assert_eq!(muster_sql::index_name("donations", &["donor_id"]), "idx_donations_donor_id");
/// assert_eq!(
///     muster_sql::index_name("referrals", &["recruiter_id", "created_at"]),
///     "idx_referrals_recruiter_id_created_at"
/// );
/// ```
pub fn index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    bounded_name("idx", table, columns)
}

/// Generate a standard unique index name for a table and columns.
///
/// Uses the convention `uq_{table}_{columns}` where columns are joined by underscore.
///
/// # Examples
///
/// ```
/// assert_eq!(muster_sql::unique_index_name("profiles", &["email"]), "uq_profiles_email");
/// ```
pub fn unique_index_name(table: &str, columns: &[impl AsRef<str>]) -> String {
    bounded_name("uq", table, columns)
}

/// Join `prefix_table_columns`, falling back to a truncated name plus a stable
/// hash when the result would not fit in a Postgres identifier.
fn bounded_name(prefix: &str, table: &str, columns: &[impl AsRef<str>]) -> String {
    let cols: Vec<&str> = columns.iter().map(|c| c.as_ref()).collect();
    let full = format!("{}_{}_{}", prefix, table, cols.join("_"));
    if full.len() <= PG_IDENT_MAX {
        return full;
    }

    let hex = blake3::hash(full.as_bytes()).to_hex().to_string();
    let suffix = &hex[..16];
    let mut len = PG_IDENT_MAX - suffix.len() - 1;
    while len > 0 && !full.is_char_boundary(len) {
        len -= 1;
    }
    format!("{}_{}", &full[..len], suffix)
}
