// Query -> parameterized SQLite. Identifiers only ever come from the static schema.
use rusqlite::types::Value as SqlValue;
use serde_json::Value;

use super::schema::{self, ColumnKind, TableDef};
use crate::backend::{BackendError, BackendResult, Column, Filter, OrderKey, Query};

/// Alias of the queried table in every generated statement.
pub const ROOT: &str = "t";

#[derive(Debug)]
pub struct Sql {
    pub text: String,
    pub params: Vec<SqlValue>,
}

/// `SELECT json_object(...) FROM table t WHERE ... ORDER BY ... LIMIT ... OFFSET ...`
pub fn select(query: &Query) -> BackendResult<Sql> {
    let table = schema::table(&query.table)?;
    let mut params = Vec::new();

    let object = row_object(table, &query.columns)?;
    let where_sql = where_clause(table, &query.filters, &mut params)?;

    let mut text = format!(
        "SELECT {} FROM {} {}{}",
        object, table.name, ROOT, where_sql
    );

    match &query.order {
        Some(order) => {
            let key = match &order.key {
                OrderKey::Field(name) => {
                    table.column(name)?;
                    format!("{}.{}", ROOT, name)
                }
                OrderKey::Count(related) => {
                    let foreign_key = query
                        .columns
                        .iter()
                        .find_map(|c| match c {
                            Column::Count { table, foreign_key } if table == related => {
                                Some(foreign_key.as_str())
                            }
                            _ => None,
                        })
                        .ok_or_else(|| {
                            BackendError::InvalidQuery(format!(
                                "Ordering by {}(count) requires selecting it",
                                related
                            ))
                        })?;
                    count_expr(table, related, foreign_key)?
                }
            };
            let direction = if order.ascending { "ASC" } else { "DESC" };
            // rowid breaks ties so pages never overlap
            text.push_str(&format!(
                " ORDER BY {} {}, {}.rowid {}",
                key, direction, ROOT, direction
            ));
        }
        None => text.push_str(&format!(" ORDER BY {}.rowid", ROOT)),
    }

    if let Some((from, to)) = query.range {
        if to < from {
            return Err(BackendError::InvalidQuery(format!(
                "Invalid range {}-{}",
                from, to
            )));
        }
        text.push_str(" LIMIT ? OFFSET ?");
        params.push(SqlValue::Integer((to - from + 1) as i64));
        params.push(SqlValue::Integer(from as i64));
    }

    Ok(Sql { text, params })
}

/// Single row by rowid, rendered with every column.
pub fn select_by_rowid(table: &TableDef) -> BackendResult<String> {
    let object = row_object(table, &[Column::All])?;
    Ok(format!(
        "SELECT {} FROM {} {} WHERE {}.rowid = ?1",
        object, table.name, ROOT, ROOT
    ))
}

/// Rowids of the rows matching `filters`.
pub fn matching_rowids(table: &TableDef, filters: &[Filter]) -> BackendResult<Sql> {
    let mut params = Vec::new();
    let where_sql = where_clause(table, filters, &mut params)?;
    Ok(Sql {
        text: format!(
            "SELECT {}.rowid FROM {} {}{}",
            ROOT, table.name, ROOT, where_sql
        ),
        params,
    })
}

fn row_object(table: &TableDef, columns: &[Column]) -> BackendResult<String> {
    let mut entries = Vec::new();
    let all = [Column::All];
    let columns = if columns.is_empty() { &all[..] } else { columns };

    for (i, column) in columns.iter().enumerate() {
        match column {
            Column::All => {
                for name in table.column_names() {
                    entries.push(column_entry(table, ROOT, name)?);
                }
            }
            Column::Field(name) => entries.push(column_entry(table, ROOT, name)?),
            Column::Embed {
                alias,
                table: related,
                via,
                columns,
            } => {
                table.column(via)?;
                let related = schema::table(related)?;
                related.column("id")?;
                let inner_alias = format!("e{}", i);
                let inner: Vec<String> = columns
                    .iter()
                    .map(|c| column_entry(related, &inner_alias, c))
                    .collect::<BackendResult<_>>()?;
                entries.push(format!(
                    "'{}', json((SELECT json_object({}) FROM {} {} WHERE {}.id = {}.{}))",
                    identifier(alias)?,
                    inner.join(", "),
                    related.name,
                    inner_alias,
                    inner_alias,
                    ROOT,
                    via
                ));
            }
            Column::Count {
                table: related,
                foreign_key,
            } => {
                let count = count_expr(table, related, foreign_key)?;
                entries.push(format!(
                    "'{}', json_array(json_object('count', {}))",
                    identifier(related)?,
                    count
                ));
            }
        }
    }

    Ok(format!("json_object({})", entries.join(", ")))
}

fn column_entry(table: &TableDef, alias: &str, name: &str) -> BackendResult<String> {
    Ok(match table.column(name)? {
        ColumnKind::Text => format!("'{}', {}.{}", name, alias, name),
        ColumnKind::Json => format!("'{}', json({}.{})", name, alias, name),
    })
}

fn count_expr(table: &TableDef, related: &str, foreign_key: &str) -> BackendResult<String> {
    table.column("id")?;
    let related = schema::table(related)?;
    related.column(foreign_key)?;
    Ok(format!(
        "(SELECT COUNT(*) FROM {} c WHERE c.{} = {}.id)",
        related.name, foreign_key, ROOT
    ))
}

fn where_clause(
    table: &TableDef,
    filters: &[Filter],
    params: &mut Vec<SqlValue>,
) -> BackendResult<String> {
    let mut clauses = Vec::new();

    for filter in filters {
        let kind = table.column(filter.column())?;
        match filter {
            Filter::Eq(column, Value::Null) => {
                clauses.push(format!("{}.{} IS NULL", ROOT, column));
            }
            Filter::Eq(column, value) => {
                if kind == ColumnKind::Json {
                    return Err(BackendError::InvalidQuery(format!(
                        "Equality on array column {}",
                        column
                    )));
                }
                clauses.push(format!("{}.{} = ?", ROOT, column));
                params.push(to_sql(value, kind)?);
            }
            Filter::Contains(column, values) => {
                if kind != ColumnKind::Json {
                    return Err(BackendError::InvalidQuery(format!(
                        "Containment on scalar column {}",
                        column
                    )));
                }
                for value in values {
                    clauses.push(format!(
                        "EXISTS (SELECT 1 FROM json_each({}.{}) WHERE json_each.value = ?)",
                        ROOT, column
                    ));
                    params.push(SqlValue::Text(value.clone()));
                }
            }
        }
    }

    if clauses.is_empty() {
        Ok(String::new())
    } else {
        Ok(format!(" WHERE {}", clauses.join(" AND ")))
    }
}

/// Convert a JSON value to a bound SQL parameter for a column of `kind`.
pub fn to_sql(value: &Value, kind: ColumnKind) -> BackendResult<SqlValue> {
    Ok(match (value, kind) {
        (Value::Null, _) => SqlValue::Null,
        (Value::String(s), ColumnKind::Text) => SqlValue::Text(s.clone()),
        (Value::Number(n), ColumnKind::Text) => SqlValue::Text(n.to_string()),
        (Value::Bool(b), ColumnKind::Text) => SqlValue::Text(b.to_string()),
        (Value::Array(items), ColumnKind::Json) => {
            if !items.iter().all(Value::is_string) {
                return Err(BackendError::InvalidQuery(
                    "Array columns hold strings only".into(),
                ));
            }
            SqlValue::Text(serde_json::to_string(value)?)
        }
        (other, kind) => {
            return Err(BackendError::InvalidQuery(format!(
                "Cannot store {} in a {:?} column",
                other, kind
            )))
        }
    })
}

fn identifier(name: &str) -> BackendResult<&str> {
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(BackendError::InvalidQuery(format!(
            "Invalid identifier {}",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_select_orders_by_rowid() {
        let sql = select(&Query::from("profiles").select_all().eq("id", "u1")).unwrap();
        assert!(sql.text.starts_with("SELECT json_object('id', t.id, 'username', t.username"));
        assert!(sql.text.ends_with("WHERE t.id = ? ORDER BY t.rowid"));
        assert_eq!(sql.params, vec![SqlValue::Text("u1".into())]);
    }

    #[test]
    fn feed_select_embeds_author_and_counts_likes() {
        let query = Query::from("posts")
            .fields(&["id", "metaverse_tags"])
            .embed("author", "profiles", "user_id", &["id", "username"])
            .count("likes", "post_id")
            .contains("metaverse_tags", vec!["Roblox".into()])
            .order_by_count("likes", false)
            .range(0, 19);
        let sql = select(&query).unwrap();

        assert!(sql.text.contains("'metaverse_tags', json(t.metaverse_tags)"));
        assert!(sql.text.contains(
            "'author', json((SELECT json_object('id', e2.id, 'username', e2.username) FROM profiles e2 WHERE e2.id = t.user_id))"
        ));
        assert!(sql.text.contains(
            "'likes', json_array(json_object('count', (SELECT COUNT(*) FROM likes c WHERE c.post_id = t.id)))"
        ));
        assert!(sql.text.contains("json_each(t.metaverse_tags)"));
        assert!(sql.text.contains(
            "ORDER BY (SELECT COUNT(*) FROM likes c WHERE c.post_id = t.id) DESC, t.rowid DESC"
        ));
        assert!(sql.text.ends_with("LIMIT ? OFFSET ?"));
        assert_eq!(
            sql.params,
            vec![
                SqlValue::Text("Roblox".into()),
                SqlValue::Integer(20),
                SqlValue::Integer(0)
            ]
        );
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = select(&Query::from("profiles").field("password_hash")).unwrap_err();
        assert!(matches!(err, BackendError::InvalidQuery(_)));
        let err = select(&Query::from("posts").order_by("nope", true)).unwrap_err();
        assert!(matches!(err, BackendError::InvalidQuery(_)));
    }

    #[test]
    fn order_by_count_needs_count_column() {
        let err = select(&Query::from("posts").order_by_count("likes", false)).unwrap_err();
        assert!(matches!(err, BackendError::InvalidQuery(_)));
    }

    #[test]
    fn null_equality_uses_is_null() {
        let sql = select(&Query::from("posts").eq("image_url", Value::Null)).unwrap();
        assert!(sql.text.contains("t.image_url IS NULL"));
        assert!(sql.params.is_empty());
    }

    #[test]
    fn json_conversion() {
        assert_eq!(
            to_sql(&json!(["a", "b"]), ColumnKind::Json).unwrap(),
            SqlValue::Text("[\"a\",\"b\"]".into())
        );
        assert!(to_sql(&json!([1]), ColumnKind::Json).is_err());
        assert!(to_sql(&json!({"a": 1}), ColumnKind::Text).is_err());
        assert_eq!(to_sql(&json!(null), ColumnKind::Text).unwrap(), SqlValue::Null);
    }
}
