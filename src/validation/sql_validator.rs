use once_cell::sync::Lazy;
use regex::Regex;

use crate::api::middleware::AppError;

/// LIMIT appended to queries that carry none.
pub const DEFAULT_SAFETY_LIMIT: u64 = 5000;

/// Destructive statements refused outright, with the label reported back.
static DENY_LIST: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"(?i)\bDROP\s+TABLE\b").unwrap(), "DROP TABLE"),
        (Regex::new(r"(?i)\bTRUNCATE\s+TABLE\b").unwrap(), "TRUNCATE TABLE"),
        (Regex::new(r"(?i)\bDROP\s+DATABASE\b").unwrap(), "DROP DATABASE"),
    ]
});

static WHERE_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());

/// Clauses a new WHERE must precede.
static TRAILING_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(GROUP\s+BY|HAVING|ORDER\s+BY|LIMIT|OFFSET)\b").unwrap());

static CURSOR_LITERAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// SQL text after validation, ready to dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    pub sql: String,
    pub limit_applied: bool,
    pub cursor_applied: bool,
}

/// Pattern-based guard and rewriter for ad-hoc SQL.
///
/// This is a heuristic, not a parser: keywords inside string literals or
/// subqueries are matched like any other text, and obfuscated statements can
/// slip past the deny-list.
pub struct QueryValidator;

impl QueryValidator {
    /// Trim, refuse destructive statements, bound the scan and inject the keyset cursor.
    ///
    /// `limit_applied` marks text that already went through LIMIT injection.
    pub fn validate_and_prepare(
        sql: &str,
        cursor_id: Option<&str>,
        limit_applied: bool,
        safety_limit: u64,
    ) -> Result<ValidatedQuery, AppError> {
        let statement = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        if statement.is_empty() {
            return Err(AppError::EmptyQuery);
        }

        Self::check_forbidden(statement)?;

        let cursor = Self::parse_cursor(cursor_id)?;

        let (mut prepared, appended_limit) = if limit_applied {
            (statement.to_string(), false)
        } else {
            Self::ensure_limit(statement, safety_limit)
        };

        let mut cursor_applied = false;
        if let Some(cursor) = cursor {
            if !Self::has_cursor_predicate(&prepared, cursor) {
                prepared = Self::inject_cursor(&prepared, cursor);
                cursor_applied = true;
            }
        }

        Ok(ValidatedQuery {
            sql: prepared,
            limit_applied: limit_applied || appended_limit || Self::has_limit(statement),
            cursor_applied,
        })
    }

    /// Reject any text matching the destructive-statement deny-list.
    pub fn check_forbidden(sql: &str) -> Result<(), AppError> {
        for (pattern, label) in DENY_LIST.iter() {
            if pattern.is_match(sql) {
                return Err(AppError::ForbiddenOperation(format!(
                    "{} statements are not allowed",
                    label
                )));
            }
        }
        Ok(())
    }

    /// Append `LIMIT <n>` unless the text mentions LIMIT anywhere.
    pub fn ensure_limit(sql: &str, safety_limit: u64) -> (String, bool) {
        if Self::has_limit(sql) {
            (sql.to_string(), false)
        } else {
            (format!("{} LIMIT {}", sql, safety_limit), true)
        }
    }

    /// Accept an optional `targetTable`; blank means absent.
    pub fn check_target_table(target_table: Option<&str>) -> Result<Option<&str>, AppError> {
        match target_table.map(str::trim) {
            None | Some("") => Ok(None),
            Some(table) if IDENTIFIER.is_match(table) => Ok(Some(table)),
            Some(table) => Err(AppError::Validation(format!(
                "targetTable '{}' is not a plain identifier",
                table
            ))),
        }
    }

    /// Rewrite bare `FROM <table>` / `JOIN <table>` references to
    /// `"catalog"."schema"."table"`. `table` must be a checked identifier.
    pub fn qualify_table(sql: &str, table: &str, catalog: &str, schema: &str) -> String {
        let pattern = format!(r"(?i)\b(FROM|JOIN)(\s+){}(\s|,|;|\)|$)", regex::escape(table));
        let Ok(re) = Regex::new(&pattern) else {
            return sql.to_string();
        };

        let qualified = format!(
            "{}.{}.{}",
            quote_ident(catalog),
            quote_ident(schema),
            quote_ident(table)
        );
        re.replace_all(sql, |caps: &regex::Captures| {
            format!("{}{}{}{}", &caps[1], &caps[2], qualified, &caps[3])
        })
        .into_owned()
    }

    /// Case-insensitive substring check, so `table_limit` counts as well.
    fn has_limit(sql: &str) -> bool {
        sql.to_ascii_lowercase().contains("limit")
    }

    fn parse_cursor(cursor_id: Option<&str>) -> Result<Option<&str>, AppError> {
        match cursor_id.map(str::trim) {
            None | Some("") => Ok(None),
            Some(cursor) if CURSOR_LITERAL.is_match(cursor) => Ok(Some(cursor)),
            Some(cursor) => Err(AppError::Validation(format!(
                "cursorId must be a non-negative integer, got '{}'",
                cursor
            ))),
        }
    }

    fn has_cursor_predicate(sql: &str, cursor: &str) -> bool {
        let pattern = format!(r"(?i)\bWHERE\s+id\s*>\s*{}\b", regex::escape(cursor));
        Regex::new(&pattern)
            .map(|re| re.is_match(sql))
            .unwrap_or(false)
    }

    /// Splice `id > cursor` into the first WHERE, or open a new WHERE before trailing clauses.
    fn inject_cursor(sql: &str, cursor: &str) -> String {
        if let Some(found) = WHERE_KEYWORD.find(sql) {
            return format!(
                "{}WHERE id > {} AND {}",
                &sql[..found.start()],
                cursor,
                sql[found.end()..].trim_start()
            );
        }

        match TRAILING_CLAUSE.find(sql) {
            Some(found) => format!(
                "{} WHERE id > {} {}",
                sql[..found.start()].trim_end(),
                cursor,
                &sql[found.start()..]
            ),
            None => format!("{} WHERE id > {}", sql, cursor),
        }
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepare(sql: &str, cursor: Option<&str>) -> ValidatedQuery {
        QueryValidator::validate_and_prepare(sql, cursor, false, DEFAULT_SAFETY_LIMIT).unwrap()
    }

    #[test]
    fn test_empty_query_rejected() {
        assert!(matches!(
            QueryValidator::validate_and_prepare("   \n\t", None, false, DEFAULT_SAFETY_LIMIT),
            Err(AppError::EmptyQuery)
        ));
        for sql in [";", "  ; ;\n", ";;"] {
            assert!(
                matches!(
                    QueryValidator::validate_and_prepare(sql, Some("5"), false, DEFAULT_SAFETY_LIMIT),
                    Err(AppError::EmptyQuery)
                ),
                "expected {sql:?} to be empty"
            );
        }
    }

    #[test]
    fn test_destructive_statements_rejected_in_any_case() {
        for sql in [
            "DROP TABLE t",
            "drop table t",
            "Truncate Table t",
            "DROP   DATABASE d",
            "select 1; drop\ntable users",
        ] {
            let result = QueryValidator::validate_and_prepare(sql, None, false, DEFAULT_SAFETY_LIMIT);
            assert!(
                matches!(result, Err(AppError::ForbiddenOperation(_))),
                "expected {sql:?} to be forbidden"
            );
        }
    }

    #[test]
    fn test_word_boundaries_respected() {
        // Identifiers that merely contain the keywords are allowed.
        assert!(QueryValidator::check_forbidden("SELECT * FROM backdrop_tables").is_ok());
        assert!(QueryValidator::check_forbidden("SELECT dropped FROM table_stats").is_ok());
    }

    #[test]
    fn test_limit_appended_once() {
        let prepared = prepare("SELECT * FROM t", None);
        assert_eq!(prepared.sql, "SELECT * FROM t LIMIT 5000");
        assert!(prepared.limit_applied);
        assert_eq!(prepared.sql.matches("LIMIT").count(), 1);
    }

    #[test]
    fn test_existing_limit_left_unchanged() {
        for sql in ["SELECT * FROM t LIMIT 10", "select * from t limit 10", "SELECT * FROM t Limit 3"] {
            assert_eq!(prepare(sql, None).sql, sql);
        }
    }

    #[test]
    fn test_trailing_semicolon_stripped() {
        assert_eq!(prepare("  SELECT 1;  ", None).sql, "SELECT 1 LIMIT 5000");
    }

    #[test]
    fn test_cursor_opens_where_clause() {
        let prepared = prepare("SELECT * FROM t", Some("42"));
        assert_eq!(prepared.sql, "SELECT * FROM t WHERE id > 42 LIMIT 5000");
        assert!(prepared.cursor_applied);
        assert_eq!(prepared.sql.matches("WHERE id > 42").count(), 1);
    }

    #[test]
    fn test_cursor_extends_existing_where() {
        let prepared = prepare("SELECT * FROM t WHERE status = 'open'", Some("7"));
        assert_eq!(
            prepared.sql,
            "SELECT * FROM t WHERE id > 7 AND status = 'open' LIMIT 5000"
        );
    }

    #[test]
    fn test_cursor_goes_before_order_by() {
        let prepared = prepare("SELECT * FROM t ORDER BY id", Some("9"));
        assert_eq!(prepared.sql, "SELECT * FROM t WHERE id > 9 ORDER BY id LIMIT 5000");
    }

    #[test]
    fn test_blank_cursor_treated_as_absent() {
        let prepared = prepare("SELECT * FROM t", Some("  "));
        assert_eq!(prepared.sql, "SELECT * FROM t LIMIT 5000");
        assert!(!prepared.cursor_applied);
    }

    #[test]
    fn test_non_numeric_cursor_rejected() {
        let result =
            QueryValidator::validate_and_prepare("SELECT * FROM t", Some("1 OR 1=1"), false, DEFAULT_SAFETY_LIMIT);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_validation_is_idempotent() {
        let first = prepare("SELECT * FROM t WHERE a = 1", Some("5"));
        let second = QueryValidator::validate_and_prepare(
            &first.sql,
            Some("5"),
            first.limit_applied,
            DEFAULT_SAFETY_LIMIT,
        )
        .unwrap();

        assert_eq!(second.sql, first.sql);
        assert!(!second.cursor_applied);
        assert_eq!(second.sql.matches("LIMIT").count(), 1);
        assert_eq!(second.sql.matches("id > 5").count(), 1);

        // Same result without the marker: the substring check still sees LIMIT.
        let third = prepare(&first.sql, Some("5"));
        assert_eq!(third.sql, first.sql);
    }

    #[test]
    fn test_limit_marker_skips_injection() {
        let prepared =
            QueryValidator::validate_and_prepare("SELECT * FROM t", None, true, DEFAULT_SAFETY_LIMIT).unwrap();
        assert_eq!(prepared.sql, "SELECT * FROM t");
        assert!(prepared.limit_applied);
    }

    #[test]
    fn test_custom_safety_limit() {
        let (sql, appended) = QueryValidator::ensure_limit("SELECT 1", 10);
        assert_eq!(sql, "SELECT 1 LIMIT 10");
        assert!(appended);
    }

    #[test]
    fn test_target_table_must_be_identifier() {
        assert_eq!(QueryValidator::check_target_table(Some("orders_2024")).unwrap(), Some("orders_2024"));
        assert_eq!(QueryValidator::check_target_table(Some("  ")).unwrap(), None);
        assert_eq!(QueryValidator::check_target_table(None).unwrap(), None);
        for bad in ["1orders", "orders; DROP", "sales.orders", "\"orders\""] {
            assert!(
                matches!(QueryValidator::check_target_table(Some(bad)), Err(AppError::Validation(_))),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_qualify_table_rewrites_bare_references() {
        let sql = QueryValidator::qualify_table(
            "SELECT * FROM orders o JOIN orders p ON o.id = p.id LIMIT 5000",
            "orders",
            "hive",
            "sales",
        );
        assert_eq!(
            sql,
            r#"SELECT * FROM "hive"."sales"."orders" o JOIN "hive"."sales"."orders" p ON o.id = p.id LIMIT 5000"#
        );
    }

    #[test]
    fn test_qualify_table_leaves_other_names_alone() {
        let untouched = [
            "SELECT * FROM orders_archive LIMIT 1",
            "SELECT * FROM hive.sales.orders LIMIT 1",
            "SELECT orders FROM t LIMIT 1",
        ];
        for sql in untouched {
            assert_eq!(QueryValidator::qualify_table(sql, "orders", "hive", "sales"), sql);
        }
        assert_eq!(
            QueryValidator::qualify_table("select * from ORDERS", "orders", "hive", "sales"),
            r#"select * from "hive"."sales"."orders""#
        );
    }
}
