// Parameter-style translation for the relational adapters.
//
// Caller-facing SQL uses two placeholder conventions: positional `?`
// (SQLite, MySQL) and named `%(key)s` (PostgreSQL, MySQL). Each adapter
// rewrites the caller style into its driver's native markers and extracts
// the values in scan order. Values are always bound at driver level; no
// textual interpolation ever happens here.

use serde_json::Value;

use crate::traits::DatabaseError;

/// Parameters for one `execute` call.
#[derive(Debug, Clone)]
pub enum Params {
    /// Ordered values bound index-for-index to positional markers.
    Positional(Vec<Value>),
    /// Key/value arguments for named placeholders or document operations.
    Named(serde_json::Map<String, Value>),
}

impl Params {
    pub fn positional(values: impl IntoIterator<Item = Value>) -> Self {
        Params::Positional(values.into_iter().collect())
    }

    pub fn named(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Params::Named(pairs.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Params::Positional(v) => v.is_empty(),
            Params::Named(m) => m.is_empty(),
        }
    }
}

/// Placeholder census for one SQL string, taken outside string literals.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct SqlScan {
    /// `%(key)s` keys in the order the scan encountered them.
    pub named_keys: Vec<String>,
    /// Count of `?` markers.
    pub question_marks: usize,
    /// Count of `$N` markers.
    pub dollar_markers: usize,
}

/// Scan SQL for placeholders, skipping single-quoted string literals
/// (with `''` escaping) and double-quoted identifiers.
pub(crate) fn scan_sql(sql: &str) -> SqlScan {
    let mut scan = SqlScan::default();
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                let quote = bytes[i];
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // Doubled quote is an escape, stay inside the literal
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'?' => {
                scan.question_marks += 1;
                i += 1;
            }
            b'$' => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > i + 1 {
                    scan.dollar_markers += 1;
                }
                i = j.max(i + 1);
            }
            b'%' if i + 1 < bytes.len() && bytes[i + 1] == b'(' => {
                if let Some(end) = sql[i + 2..].find(')') {
                    let key = &sql[i + 2..i + 2 + end];
                    let after = i + 2 + end + 1;
                    if bytes.get(after) == Some(&b's') && !key.is_empty() {
                        scan.named_keys.push(key.to_string());
                        i = after + 1;
                        continue;
                    }
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    scan
}

/// Rewrite `%(key)s` placeholders into the target marker style, pulling the
/// bound values out of `named` in scan order.
fn rewrite_named(
    sql: &str,
    named: &serde_json::Map<String, Value>,
    marker: impl Fn(usize) -> String,
) -> Result<(String, Vec<Value>), DatabaseError> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => {
                let quote = bytes[i];
                let start = i;
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
                out.push_str(&sql[start..i]);
            }
            b'%' if i + 1 < bytes.len() && bytes[i + 1] == b'(' => {
                let placeholder = sql[i + 2..]
                    .find(')')
                    .map(|end| (&sql[i + 2..i + 2 + end], i + 2 + end + 1));
                match placeholder {
                    Some((key, after)) if bytes.get(after) == Some(&b's') && !key.is_empty() => {
                        let value = named.get(key).ok_or_else(|| {
                            DatabaseError::InvalidParams(format!(
                                "missing value for placeholder '{}'",
                                key
                            ))
                        })?;
                        values.push(value.clone());
                        out.push_str(&marker(values.len()));
                        i = after + 1;
                    }
                    _ => {
                        out.push('%');
                        i += 1;
                    }
                }
            }
            _ => {
                let ch_len = sql[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                out.push_str(&sql[i..i + ch_len]);
                i += ch_len;
            }
        }
    }

    Ok((out, values))
}

/// Binding for the positional-only embedded backend: SQL carries `?`
/// markers and params must be an ordered sequence of matching length.
pub(crate) fn prepare_positional(
    sql: &str,
    params: Option<&Params>,
) -> Result<Vec<Value>, DatabaseError> {
    let scan = scan_sql(sql);
    if !scan.named_keys.is_empty() {
        return Err(DatabaseError::InvalidParams(
            "named %(key)s placeholders are not supported by this backend; use positional ? markers"
                .to_string(),
        ));
    }

    match params {
        None => {
            if scan.question_marks > 0 {
                return Err(DatabaseError::InvalidParams(format!(
                    "statement has {} placeholder(s) but no parameters were supplied",
                    scan.question_marks
                )));
            }
            Ok(Vec::new())
        }
        Some(Params::Named(_)) => Err(DatabaseError::InvalidParams(
            "named parameters cannot bind to positional ? markers".to_string(),
        )),
        Some(Params::Positional(values)) => {
            if values.len() != scan.question_marks {
                return Err(DatabaseError::InvalidParams(format!(
                    "statement has {} placeholder(s) but {} value(s) were supplied",
                    scan.question_marks,
                    values.len()
                )));
            }
            Ok(values.clone())
        }
    }
}

/// Binding for PostgreSQL: `%(key)s` placeholders are rewritten to `$N`;
/// SQL already using `$N` markers binds an ordered sequence directly.
pub(crate) fn prepare_postgres(
    sql: &str,
    params: Option<&Params>,
) -> Result<(String, Vec<Value>), DatabaseError> {
    let scan = scan_sql(sql);

    if !scan.named_keys.is_empty() {
        return match params {
            Some(Params::Named(named)) => rewrite_named(sql, named, |n| format!("${}", n)),
            Some(Params::Positional(_)) => Err(DatabaseError::InvalidParams(
                "statement uses named %(key)s placeholders; supply a parameter mapping".to_string(),
            )),
            None => Err(DatabaseError::InvalidParams(format!(
                "statement has {} named placeholder(s) but no parameters were supplied",
                scan.named_keys.len()
            ))),
        };
    }

    match params {
        None => {
            if scan.dollar_markers > 0 {
                return Err(DatabaseError::InvalidParams(format!(
                    "statement has {} placeholder(s) but no parameters were supplied",
                    scan.dollar_markers
                )));
            }
            Ok((sql.to_string(), Vec::new()))
        }
        Some(Params::Named(_)) => Err(DatabaseError::InvalidParams(
            "statement has no named %(key)s placeholders for the supplied mapping".to_string(),
        )),
        Some(Params::Positional(values)) => {
            if values.len() != scan.dollar_markers {
                return Err(DatabaseError::InvalidParams(format!(
                    "statement has {} placeholder(s) but {} value(s) were supplied",
                    scan.dollar_markers,
                    values.len()
                )));
            }
            Ok((sql.to_string(), values.clone()))
        }
    }
}

/// Binding for MySQL: `%(key)s` placeholders are rewritten to `?`;
/// positional `?` SQL binds an ordered sequence directly.
pub(crate) fn prepare_mysql(
    sql: &str,
    params: Option<&Params>,
) -> Result<(String, Vec<Value>), DatabaseError> {
    let scan = scan_sql(sql);

    if !scan.named_keys.is_empty() {
        if scan.question_marks > 0 {
            return Err(DatabaseError::InvalidParams(
                "statement mixes named %(key)s and positional ? placeholders".to_string(),
            ));
        }
        return match params {
            Some(Params::Named(named)) => rewrite_named(sql, named, |_| "?".to_string()),
            Some(Params::Positional(_)) => Err(DatabaseError::InvalidParams(
                "statement uses named %(key)s placeholders; supply a parameter mapping".to_string(),
            )),
            None => Err(DatabaseError::InvalidParams(format!(
                "statement has {} named placeholder(s) but no parameters were supplied",
                scan.named_keys.len()
            ))),
        };
    }

    prepare_positional(sql, params).map(|values| (sql.to_string(), values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scan_finds_named_keys_in_order() {
        let scan = scan_sql("INSERT INTO t (a, b) VALUES (%(first)s, %(second)s)");
        assert_eq!(scan.named_keys, vec!["first", "second"]);
        assert_eq!(scan.question_marks, 0);
    }

    #[test]
    fn test_scan_skips_string_literals() {
        let scan = scan_sql("SELECT '?' , 'it''s %(not)s a placeholder', col FROM t WHERE id = ?");
        assert_eq!(scan.question_marks, 1);
        assert!(scan.named_keys.is_empty());
    }

    #[test]
    fn test_scan_counts_dollar_markers() {
        let scan = scan_sql("SELECT * FROM t WHERE id = $1 AND name = $2");
        assert_eq!(scan.dollar_markers, 2);
    }

    #[test]
    fn test_positional_binding() {
        let values =
            prepare_positional("INSERT INTO t VALUES (?, ?)", Some(&Params::positional([
                json!(1),
                json!("x"),
            ])))
            .unwrap();
        assert_eq!(values, vec![json!(1), json!("x")]);
    }

    #[test]
    fn test_positional_rejects_named_params() {
        let params = Params::named([("name".to_string(), json!("x"))]);
        let err = prepare_positional("INSERT INTO t VALUES (?)", Some(&params)).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParams(_)));
    }

    #[test]
    fn test_positional_rejects_missing_params() {
        let err = prepare_positional("INSERT INTO t VALUES (?)", None).unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParams(_)));
    }

    #[test]
    fn test_positional_rejects_count_mismatch() {
        let err = prepare_positional(
            "INSERT INTO t VALUES (?, ?)",
            Some(&Params::positional([json!(1)])),
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParams(_)));
    }

    #[test]
    fn test_postgres_rewrite() {
        let params = Params::named([
            ("name".to_string(), json!("alice")),
            ("age".to_string(), json!(30)),
        ]);
        let (sql, values) = prepare_postgres(
            "INSERT INTO users (name, age) VALUES (%(name)s, %(age)s)",
            Some(&params),
        )
        .unwrap();
        assert_eq!(sql, "INSERT INTO users (name, age) VALUES ($1, $2)");
        assert_eq!(values, vec![json!("alice"), json!(30)]);
    }

    #[test]
    fn test_postgres_repeated_key_binds_each_occurrence() {
        let params = Params::named([("id".to_string(), json!(7))]);
        let (sql, values) =
            prepare_postgres("SELECT * FROM t WHERE a = %(id)s OR b = %(id)s", Some(&params))
                .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 OR b = $2");
        assert_eq!(values, vec![json!(7), json!(7)]);
    }

    #[test]
    fn test_postgres_missing_key() {
        let params = Params::named([("name".to_string(), json!("alice"))]);
        let err = prepare_postgres(
            "INSERT INTO users (name, age) VALUES (%(name)s, %(age)s)",
            Some(&params),
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParams(_)));
    }

    #[test]
    fn test_postgres_rejects_positional_for_named_sql() {
        let err = prepare_postgres(
            "SELECT * FROM t WHERE id = %(id)s",
            Some(&Params::positional([json!(1)])),
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParams(_)));
    }

    #[test]
    fn test_mysql_rewrite_to_question_marks() {
        let params = Params::named([("name".to_string(), json!("bob"))]);
        let (sql, values) =
            prepare_mysql("SELECT * FROM users WHERE name = %(name)s", Some(&params)).unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE name = ?");
        assert_eq!(values, vec![json!("bob")]);
    }

    #[test]
    fn test_mysql_rejects_mixed_styles() {
        let params = Params::named([("name".to_string(), json!("bob"))]);
        let err = prepare_mysql(
            "SELECT * FROM users WHERE name = %(name)s AND id = ?",
            Some(&params),
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidParams(_)));
    }

    #[test]
    fn test_rewrite_preserves_literals() {
        let params = Params::named([("v".to_string(), json!("x"))]);
        let (sql, values) = prepare_postgres(
            "UPDATE t SET note = 'keep %(this)s' WHERE v = %(v)s",
            Some(&params),
        )
        .unwrap();
        assert_eq!(sql, "UPDATE t SET note = 'keep %(this)s' WHERE v = $1");
        assert_eq!(values, vec![json!("x")]);
    }
}
