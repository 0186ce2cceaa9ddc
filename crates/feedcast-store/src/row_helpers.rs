use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    get(row, idx, table, column)
}

/// Parse a JSON string column, returning CorruptRow on parse failure.
pub fn parse_json(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<serde_json::Value, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_success() {
        let value = parse_json(r#"{"title": "A"}"#, "change_log", "document").unwrap();
        assert_eq!(value["title"], "A");
    }

    #[test]
    fn parse_json_failure() {
        let result = parse_json("{not json", "change_log", "document");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "change_log", column: "document", .. })
        ));
    }

    #[test]
    fn typed_getters() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let (n, missing, wrong): (i64, Option<String>, Result<i64, StoreError>) = conn
            .query_row("SELECT 7, NULL, 'text'", [], |row| {
                Ok((
                    get(row, 0, "t", "a").unwrap(),
                    get_opt(row, 1, "t", "b").unwrap(),
                    get(row, 2, "t", "c"),
                ))
            })
            .unwrap();
        assert_eq!(n, 7);
        assert_eq!(missing, None);
        assert!(matches!(wrong, Err(StoreError::CorruptRow { column: "c", .. })));
    }
}
