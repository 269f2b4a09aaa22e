//! Column type inference for text-based imports.
//!
//! Types form a small lattice: NULL < BOOLEAN | BIGINT < DOUBLE < VARCHAR.
//! Sampled values widen a column's type; a column that only ever saw NULL
//! ends up VARCHAR. Values read after the sample keep widening it, and the
//! staging table follows through [`alter_table_sql`].

use crate::store::quote_ident;
use duckdb::types::Value;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    BigInt,
    Double,
    Varchar,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Varchar => "VARCHAR",
        }
    }

    pub fn widen(current: Option<ColumnType>, seen: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (current, seen) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(BigInt), Double) | (Some(Double), BigInt) => Double,
            _ => Varchar,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
}

pub fn create_table_sql(table: &str, columns: &[ColumnSpec]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql_name()))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
}

/// Statements that bring a table created from `before` up to `after`, where
/// `after` keeps the columns of `before` in order and may append new ones.
pub fn alter_table_sql(table: &str, before: &[ColumnSpec], after: &[ColumnSpec]) -> Vec<String> {
    let table = quote_ident(table);
    after
        .iter()
        .enumerate()
        .filter_map(|(idx, col)| match before.get(idx) {
            Some(old) if old.ty == col.ty => None,
            Some(_) => Some(format!(
                "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {}",
                table,
                quote_ident(&col.name),
                col.ty.sql_name()
            )),
            None => Some(format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                table,
                quote_ident(&col.name),
                col.ty.sql_name()
            )),
        })
        .collect()
}

/// Widen `col` to cover `seen`; true if its type changed.
pub fn widen_column(col: &mut ColumnSpec, seen: Option<ColumnType>) -> bool {
    let Some(seen) = seen else {
        return false;
    };
    let widened = ColumnType::widen(Some(col.ty), seen);
    if widened == col.ty {
        return false;
    }
    tracing::debug!(
        column = %col.name,
        from = col.ty.sql_name(),
        to = widened.sql_name(),
        "column type widened past the sample"
    );
    col.ty = widened;
    true
}

/// Replace blank header names and disambiguate repeats (`id`, `id_2`, ...).
pub fn unique_column_names<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for (idx, name) in raw.into_iter().enumerate() {
        let base = match name.as_ref().trim() {
            "" => format!("column{}", idx),
            trimmed => trimmed.to_string(),
        };
        let mut candidate = base.clone();
        let mut n = 2;
        while !seen.insert(candidate.to_lowercase()) {
            candidate = format!("{}_{}", base, n);
            n += 1;
        }
        names.push(candidate);
    }
    names
}

// ---------------------------------------------------------------------------
// Delimited text
// ---------------------------------------------------------------------------

/// Type suggested by one text field; `None` for an empty field.
pub fn classify_text(field: &str) -> Option<ColumnType> {
    let t = field.trim();
    if t.is_empty() {
        return None;
    }
    if t.eq_ignore_ascii_case("true") || t.eq_ignore_ascii_case("false") {
        return Some(ColumnType::Boolean);
    }
    if t.parse::<i64>().is_ok() {
        return Some(ColumnType::BigInt);
    }
    // f64 parsing also accepts words like "inf" and "NaN"; require a digit.
    if t.bytes().any(|b| b.is_ascii_digit()) && t.parse::<f64>().is_ok() {
        return Some(ColumnType::Double);
    }
    Some(ColumnType::Varchar)
}

pub fn text_to_value(ty: ColumnType, field: &str) -> Result<Value, String> {
    let t = field.trim();
    if t.is_empty() {
        return Ok(Value::Null);
    }
    match ty {
        ColumnType::Boolean => {
            if t.eq_ignore_ascii_case("true") {
                Ok(Value::Boolean(true))
            } else if t.eq_ignore_ascii_case("false") {
                Ok(Value::Boolean(false))
            } else {
                Err(format!("'{}' is not a valid BOOLEAN", field))
            }
        }
        ColumnType::BigInt => t
            .parse::<i64>()
            .map(Value::BigInt)
            .map_err(|_| format!("'{}' is not a valid BIGINT", field)),
        ColumnType::Double => t
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| format!("'{}' is not a valid DOUBLE", field)),
        ColumnType::Varchar => Ok(Value::Text(field.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Structured records
// ---------------------------------------------------------------------------

pub fn classify_json(value: &serde_json::Value) -> Option<ColumnType> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(_) => Some(ColumnType::Boolean),
        serde_json::Value::Number(n) if n.is_i64() => Some(ColumnType::BigInt),
        serde_json::Value::Number(_) => Some(ColumnType::Double),
        _ => Some(ColumnType::Varchar),
    }
}

pub fn json_to_value(ty: ColumnType, value: &serde_json::Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let mismatch = || format!("{} is not a valid {}", value, ty.sql_name());
    match ty {
        ColumnType::Boolean => value.as_bool().map(Value::Boolean).ok_or_else(mismatch),
        ColumnType::BigInt => value.as_i64().map(Value::BigInt).ok_or_else(mismatch),
        ColumnType::Double => value.as_f64().map(Value::Double).ok_or_else(mismatch),
        ColumnType::Varchar => Ok(Value::Text(match value {
            serde_json::Value::String(s) => s.clone(),
            // Nested values are kept as their JSON text.
            other => other.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn infer<'a>(fields: impl IntoIterator<Item = &'a str>) -> ColumnType {
        let mut ty = None;
        for f in fields {
            if let Some(seen) = classify_text(f) {
                ty = Some(ColumnType::widen(ty, seen));
            }
        }
        ty.unwrap_or(ColumnType::Varchar)
    }

    #[test]
    fn test_text_inference() {
        assert_eq!(infer(["1", "2", ""]), ColumnType::BigInt);
        assert_eq!(infer(["1", "2.5"]), ColumnType::Double);
        assert_eq!(infer(["true", "FALSE"]), ColumnType::Boolean);
        assert_eq!(infer(["true", "1"]), ColumnType::Varchar);
        assert_eq!(infer(["Nan", "Inf"]), ColumnType::Varchar);
        assert_eq!(infer(["", ""]), ColumnType::Varchar);
    }

    #[test]
    fn test_text_conversion() {
        assert_eq!(text_to_value(ColumnType::BigInt, " 42 ").unwrap(), Value::BigInt(42));
        assert_eq!(text_to_value(ColumnType::BigInt, "").unwrap(), Value::Null);
        assert_eq!(text_to_value(ColumnType::Boolean, "True").unwrap(), Value::Boolean(true));
        let err = text_to_value(ColumnType::BigInt, "abc").unwrap_err();
        assert_eq!(err, "'abc' is not a valid BIGINT");
    }

    #[test]
    fn test_json_inference_and_conversion() {
        assert_eq!(classify_json(&json!(1)), Some(ColumnType::BigInt));
        assert_eq!(classify_json(&json!(1.5)), Some(ColumnType::Double));
        assert_eq!(classify_json(&json!({"a": 1})), Some(ColumnType::Varchar));
        assert_eq!(classify_json(&json!(null)), None);

        assert_eq!(json_to_value(ColumnType::Double, &json!(3)).unwrap(), Value::Double(3.0));
        assert_eq!(
            json_to_value(ColumnType::Varchar, &json!([1, 2])).unwrap(),
            Value::Text("[1,2]".into())
        );
        assert!(json_to_value(ColumnType::BigInt, &json!("x")).is_err());
    }

    #[test]
    fn test_unique_column_names() {
        assert_eq!(
            unique_column_names(["id", "", "ID", "name"]),
            vec!["id", "column1", "ID_2", "name"]
        );
    }

    #[test]
    fn test_create_table_sql() {
        let cols = vec![
            ColumnSpec { name: "id".into(), ty: ColumnType::BigInt },
            ColumnSpec { name: "full name".into(), ty: ColumnType::Varchar },
        ];
        assert_eq!(
            create_table_sql("t", &cols),
            "CREATE TABLE \"t\" (\"id\" BIGINT, \"full name\" VARCHAR)"
        );
    }

    #[test]
    fn test_widen_and_alter() {
        let before = vec![
            ColumnSpec { name: "id".into(), ty: ColumnType::BigInt },
            ColumnSpec { name: "score".into(), ty: ColumnType::BigInt },
        ];
        let mut after = before.clone();
        assert!(!widen_column(&mut after[0], Some(ColumnType::BigInt)));
        assert!(!widen_column(&mut after[0], None));
        assert!(widen_column(&mut after[1], Some(ColumnType::Double)));
        after.push(ColumnSpec { name: "note".into(), ty: ColumnType::Varchar });

        assert_eq!(
            alter_table_sql("t", &before, &after),
            vec![
                "ALTER TABLE \"t\" ALTER COLUMN \"score\" SET DATA TYPE DOUBLE".to_string(),
                "ALTER TABLE \"t\" ADD COLUMN \"note\" VARCHAR".to_string(),
            ]
        );
        assert!(alter_table_sql("t", &after, &after).is_empty());
    }
}
