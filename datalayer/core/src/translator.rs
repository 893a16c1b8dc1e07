//! Logical-to-physical table name translation
//!
//! Queries are written against the warehouse's catalog names. Lakebase holds
//! synced copies under a different namespace, so the primary executor
//! rewrites table references before running a query.
//!
//! This is a lexical rewrite, not a SQL parser. Identifiers inside string
//! literals and comments are rewritten too. A match only counts when it is
//! not glued to a preceding identifier character or dot, so running the
//! translator over its own output changes nothing.

/// Default logical → physical table mapping for the jobs-monitor deployment
pub const DEFAULT_TABLE_MAPPINGS: &[(&str, &str)] = &[
    ("system.lakeflow.jobs", "jobs_monitor.synced.jobs"),
    (
        "system.lakeflow.job_run_timeline",
        "jobs_monitor.synced.job_run_timeline",
    ),
    (
        "system.lakeflow.job_task_run_timeline",
        "jobs_monitor.synced.job_task_run_timeline",
    ),
    ("system.billing.usage", "jobs_monitor.synced.billing_usage"),
    ("system.billing.list_prices", "jobs_monitor.synced.list_prices"),
    ("system.compute.clusters", "jobs_monitor.synced.clusters"),
];

/// Physical namespace that custom catalog.schema tables are synced into
pub const DEFAULT_PHYSICAL_NAMESPACE: &str = "jobs_monitor.cost_management";

/// Ordered logical → physical identifier mapping
#[derive(Clone, Debug, Default)]
pub struct TableMapping {
    entries: Vec<(String, String)>,
}

impl TableMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mapping; earlier entries are applied first
    #[must_use]
    pub fn with(mut self, logical: impl Into<String>, physical: impl Into<String>) -> Self {
        self.entries.push((logical.into(), physical.into()));
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

#[must_use]
pub fn default_mappings() -> TableMapping {
    DEFAULT_TABLE_MAPPINGS
        .iter()
        .fold(TableMapping::new(), |m, (l, p)| m.with(*l, *p))
}

#[derive(Clone, Debug)]
pub struct IdentifierTranslator {
    mapping: TableMapping,
    logical_prefix: String,
    physical_prefix: String,
}

impl IdentifierTranslator {
    /// Build a translator that also moves `{catalog}.{schema}.` tables into
    /// `physical_namespace`
    #[must_use]
    pub fn new(
        mapping: TableMapping,
        catalog: &str,
        schema: &str,
        physical_namespace: &str,
    ) -> Self {
        Self {
            mapping,
            logical_prefix: format!("{catalog}.{schema}."),
            physical_prefix: format!("{}.", physical_namespace.trim_end_matches('.')),
        }
    }

    #[must_use]
    pub fn mapping(&self) -> &TableMapping {
        &self.mapping
    }

    #[must_use]
    pub fn translate(&self, query: &str) -> String {
        let mut translated = query.to_string();

        for (logical, physical) in self.mapping.entries() {
            translated = replace_identifier(&translated, logical, physical, true);
        }

        // Prefix is followed by a table name, so no trailing boundary check
        replace_identifier(
            &translated,
            &self.logical_prefix,
            &self.physical_prefix,
            false,
        )
    }
}

impl Default for IdentifierTranslator {
    fn default() -> Self {
        Self::new(
            default_mappings(),
            "hls_amer_catalog",
            "cost_management",
            DEFAULT_PHYSICAL_NAMESPACE,
        )
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Replace whole-identifier occurrences of `from` with `to`
///
/// A match must not be preceded by an identifier character or a dot. With
/// `check_end`, it must also not be followed by an identifier character.
fn replace_identifier(text: &str, from: &str, to: &str, check_end: bool) -> String {
    if from.is_empty() || from == to {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for (start, _) in text.match_indices(from) {
        // Overlaps a replacement we already made
        if start < cursor {
            continue;
        }
        let end = start + from.len();

        let before_ok = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_ident_char(c) && c != '.');
        let after_ok = !check_end || text[end..].chars().next().map_or(true, |c| !is_ident_char(c));

        if before_ok && after_ok {
            out.push_str(&text[cursor..start]);
            out.push_str(to);
            cursor = end;
        }
    }

    out.push_str(&text[cursor..]);
    out
}
