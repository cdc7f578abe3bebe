//! Conflict-resolving insert statements built from normalized rows.

use shelf_core::{ColumnValue, NormalizedRow, TableSpec, ID_COLUMN, SYNCED_AT_COLUMN};

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertStatement {
    pub sql: String,
    pub params: Vec<ColumnValue>,
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Builds `INSERT .. ON CONFLICT (id) DO UPDATE` for every column present on the row.
///
/// Every placeholder carries an explicit cast to the column's declared type so untyped
/// parameters (nulls, serialized blobs, timestamp text) land in the right column type.
/// On conflict every column except the id, the location id and the natural id is
/// overwritten, and `synced_at` is always reset to the write time.
pub fn build_upsert(table: &TableSpec, row: &NormalizedRow) -> UpsertStatement {
    let mut columns = Vec::with_capacity(row.len() + 1);
    let mut placeholders = Vec::with_capacity(row.len() + 1);
    let mut updates = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());

    for (column, value) in row.columns() {
        if column == SYNCED_AT_COLUMN {
            continue;
        }
        params.push(value.clone());
        let index = params.len();
        let placeholder = match table.column_type(column) {
            Some(ty) => format!("${index}::{}", ty.cast()),
            None => format!("${index}"),
        };
        let quoted = quote_ident(column);
        if !table.is_immutable(column) {
            updates.push(format!("{quoted} = EXCLUDED.{quoted}"));
        }
        columns.push(quoted);
        placeholders.push(placeholder);
    }

    let synced_at = quote_ident(SYNCED_AT_COLUMN);
    columns.push(synced_at.clone());
    placeholders.push("NOW()".to_string());
    updates.push(format!("{synced_at} = NOW()"));

    let sql = format!(
        "INSERT INTO {table} ({columns}) VALUES ({values}) ON CONFLICT ({id}) DO UPDATE SET {updates}",
        table = quote_ident(table.name),
        columns = columns.join(", "),
        values = placeholders.join(", "),
        id = quote_ident(ID_COLUMN),
        updates = updates.join(", "),
    );

    UpsertStatement { sql, params }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelf_core::DISCOUNTS_TABLE;

    fn discount_row() -> NormalizedRow {
        let mut row = NormalizedRow::new();
        row.set("discount_id", ColumnValue::Text("77".into()));
        row.set("discount_name", ColumnValue::Text("Half off".into()));
        row.set("discount_amount", ColumnValue::Int(50));
        row.set("products", ColumnValue::Json(r#"{"ids":[1],"isExclusion":false}"#.into()));
        row.set("valid_until", ColumnValue::Null);
        row.set("location_id", ColumnValue::Text("loc-a".into()));
        row.set("id", ColumnValue::Text("loc-a_77".into()));
        row
    }

    #[test]
    fn statement_lists_every_present_column_with_casts() {
        let stmt = build_upsert(&DISCOUNTS_TABLE, &discount_row());
        assert!(stmt.sql.starts_with(
            "INSERT INTO \"discounts\" (\"discount_id\", \"discount_name\", \"discount_amount\", \"products\", \"valid_until\", \"location_id\", \"id\", \"synced_at\")"
        ));
        assert!(stmt.sql.contains(
            "VALUES ($1::text, $2::text, $3::numeric, $4::jsonb, $5::timestamptz, $6::text, $7::text, NOW())"
        ));
        assert_eq!(stmt.params.len(), 7);
        assert_eq!(stmt.params[2], ColumnValue::Int(50));
    }

    #[test]
    fn conflict_clause_never_overwrites_keys_and_resets_synced_at() {
        let stmt = build_upsert(&DISCOUNTS_TABLE, &discount_row());
        let (_, update) = stmt
            .sql
            .split_once("ON CONFLICT (\"id\") DO UPDATE SET ")
            .expect("conflict clause");
        assert_eq!(
            update,
            "\"discount_name\" = EXCLUDED.\"discount_name\", \"discount_amount\" = EXCLUDED.\"discount_amount\", \"products\" = EXCLUDED.\"products\", \"valid_until\" = EXCLUDED.\"valid_until\", \"synced_at\" = NOW()"
        );
    }

    #[test]
    fn identical_rows_build_identical_statements() {
        let first = build_upsert(&DISCOUNTS_TABLE, &discount_row());
        let second = build_upsert(&DISCOUNTS_TABLE, &discount_row());
        assert_eq!(first, second);
    }

    #[test]
    fn synced_at_on_the_row_is_ignored() {
        let mut row = discount_row();
        row.set("synced_at", ColumnValue::Text("1999-01-01T00:00:00Z".into()));
        let stmt = build_upsert(&DISCOUNTS_TABLE, &row);
        assert_eq!(stmt.params.len(), 7);
        assert_eq!(stmt.sql.matches("\"synced_at\"").count(), 2);
    }
}
