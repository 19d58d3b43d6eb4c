//! The narrow SQL-like query DSL the evaluator and dashboards use to
//! read metric/log backends. Builders only; execution belongs to the
//! backend adapter outside the core.

/// Builds `SELECT … FROM <table_id> WHERE … [GROUP BY …] [ORDER BY ts]
/// [LIMIT n]` statements. A time-range predicate on the time field is
/// injected when the caller did not add one.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    table: String,
    fields: Vec<String>,
    conditions: Vec<String>,
    group_by: Vec<String>,
    order_by: Option<String>,
    limit: Option<u32>,
    time_field: String,
}

impl SqlQuery {
    pub fn from_table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            fields: Vec::new(),
            conditions: Vec::new(),
            group_by: Vec::new(),
            order_by: None,
            limit: None,
            time_field: "time".to_string(),
        }
    }

    pub fn select(mut self, field: &str) -> Self {
        self.fields.push(field.to_string());
        self
    }

    pub fn time_field(mut self, field: &str) -> Self {
        self.time_field = field.to_string();
        self
    }

    /// Adds one `field op value` predicate; predicates are ANDed.
    pub fn where_cond(mut self, field: &str, op: &str, value: &str) -> Self {
        self.conditions.push(format!("{field} {op} '{value}'"));
        self
    }

    /// Adds a raw predicate for expressions the simple form cannot say.
    pub fn where_raw(mut self, predicate: &str) -> Self {
        self.conditions.push(predicate.to_string());
        self
    }

    pub fn group_by(mut self, dim: &str) -> Self {
        self.group_by.push(dim.to_string());
        self
    }

    pub fn order_by_time(mut self) -> Self {
        self.order_by = Some(self.time_field.clone());
        self
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Renders the statement for `[from_ts, to_ts]`, injecting the time
    /// range when no existing predicate references the time field.
    pub fn build(&self, from_ts: i64, to_ts: i64) -> String {
        let fields = if self.fields.is_empty() {
            "*".to_string()
        } else {
            self.fields.join(", ")
        };
        let mut conditions = self.conditions.clone();
        let mentions_time = conditions
            .iter()
            .any(|c| c.contains(self.time_field.as_str()));
        if !mentions_time {
            conditions.push(format!("{} >= {from_ts}", self.time_field));
            conditions.push(format!("{} <= {to_ts}", self.time_field));
        }

        let mut sql = format!("SELECT {fields} FROM {}", self.table);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        if let Some(order) = &self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}
