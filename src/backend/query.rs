//! Backend-neutral description of a table read.
//!
//! A [`Query`] is rendered to PostgREST parameters by the REST adapter and
//! translated to SQL by the local adapter.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Every column of the queried table.
    All,
    Field(String),
    /// Many-to-one relation: the row of `table` whose `id` equals this row's `via` column.
    Embed {
        alias: String,
        table: String,
        via: String,
        columns: Vec<String>,
    },
    /// One-to-many aggregate: number of `table` rows whose `foreign_key` equals this row's `id`.
    Count { table: String, foreign_key: String },
}

impl Column {
    fn render(&self) -> String {
        match self {
            Self::All => "*".to_string(),
            Self::Field(name) => name.clone(),
            Self::Embed {
                alias,
                table,
                via,
                columns,
            } => format!("{}:{}!{}({})", alias, table, via, columns.join(",")),
            Self::Count { table, .. } => format!("{}(count)", table),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    /// Array column contains every listed value.
    Contains(String, Vec<String>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    pub fn column(&self) -> &str {
        match self {
            Self::Eq(column, _) | Self::Contains(column, _) => column,
        }
    }

    /// PostgREST `column=operator.value` pair.
    pub fn to_param(&self) -> (String, String) {
        match self {
            Self::Eq(column, value) => (column.clone(), format!("eq.{}", scalar_text(value))),
            Self::Contains(column, values) => {
                let items: Vec<String> = values.iter().map(|v| quote_array_item(v)).collect();
                (column.clone(), format!("cs.{{{}}}", items.join(",")))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderKey {
    Field(String),
    /// Number of related rows, as declared by a [`Column::Count`] on the same query.
    Count(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub key: OrderKey,
    pub ascending: bool,
}

impl Order {
    fn to_param(&self) -> String {
        let key = match &self.key {
            OrderKey::Field(name) => name.clone(),
            OrderKey::Count(table) => format!("{}(count)", table),
        };
        let direction = if self.ascending { "asc" } else { "desc" };
        format!("{}.{}", key, direction)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: Vec<Column>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    /// Inclusive row offsets `(from, to)`.
    pub range: Option<(u64, u64)>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            order: None,
            range: None,
        }
    }

    pub fn select_all(mut self) -> Self {
        self.columns.push(Column::All);
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.columns.push(Column::Field(name.into()));
        self
    }

    pub fn fields(mut self, names: &[&str]) -> Self {
        self.columns
            .extend(names.iter().map(|n| Column::Field((*n).to_string())));
        self
    }

    pub fn embed(mut self, alias: &str, table: &str, via: &str, columns: &[&str]) -> Self {
        self.columns.push(Column::Embed {
            alias: alias.to_string(),
            table: table.to_string(),
            via: via.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        });
        self
    }

    pub fn count(mut self, table: &str, foreign_key: &str) -> Self {
        self.columns.push(Column::Count {
            table: table.to_string(),
            foreign_key: foreign_key.to_string(),
        });
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    pub fn contains(mut self, column: impl Into<String>, values: Vec<String>) -> Self {
        self.filters.push(Filter::Contains(column.into(), values));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            key: OrderKey::Field(column.into()),
            ascending,
        });
        self
    }

    pub fn order_by_count(mut self, table: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            key: OrderKey::Count(table.into()),
            ascending,
        });
        self
    }

    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some((from, to));
        self
    }

    /// The `select=` value. An empty column list selects everything.
    pub fn select_param(&self) -> String {
        if self.columns.is_empty() {
            return "*".to_string();
        }
        self.columns
            .iter()
            .map(Column::render)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// PostgREST query-string parameters, in a stable order.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select_param())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if let Some(order) = &self.order {
            params.push(("order".to_string(), order.to_param()));
        }
        if let Some((from, to)) = self.range {
            params.push(("offset".to_string(), from.to_string()));
            params.push(("limit".to_string(), (to.saturating_sub(from) + 1).to_string()));
        }
        params
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn quote_array_item(item: &str) -> String {
    if item
        .chars()
        .any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\' | ' '))
    {
        format!("\"{}\"", item.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        item.to_string()
    }
}
