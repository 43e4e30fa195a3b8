//! Filter, sort, group and project stages rendered to ClickHouse SQL.
//!
//! The Event Reader and Session Resolver share this one builder instead of
//! assembling query strings ad hoc at each call site.

use oxbow_clickhouse::{escape_identifier, escape_literal};

#[derive(Debug, Clone)]
pub(crate) struct Pipeline {
    table: String,
    filters: Vec<String>,
}

impl Pipeline {
    pub fn over(table_ref: &str) -> Self {
        Self {
            table: table_ref.to_string(),
            filters: Vec::new(),
        }
    }

    pub fn match_eq(mut self, column: &str, value: &str) -> Self {
        self.filters.push(format!(
            "{} = {}",
            escape_identifier(column),
            escape_literal(value)
        ));
        self
    }

    pub fn match_ne(mut self, column: &str, value: &str) -> Self {
        self.filters.push(format!(
            "{} != {}",
            escape_identifier(column),
            escape_literal(value)
        ));
        self
    }

    pub fn match_at_least(mut self, column: &str, bound: f64) -> Self {
        self.filters
            .push(format!("{} >= {bound:?}", escape_identifier(column)));
        self
    }

    fn where_sql(&self) -> String {
        if self.filters.is_empty() {
            String::new()
        } else {
            format!("WHERE {}\n", self.filters.join("\n  AND "))
        }
    }

    /// One row per `key`, carrying every matched `value_column` sorted by
    /// `order_column` within the group. Zero matches yield zero rows, not an
    /// empty group.
    pub fn collect_sorted(self, key: &str, order_column: &str, value_column: &str) -> String {
        let key = escape_identifier(key);
        let order = escape_identifier(order_column);
        let value = escape_identifier(value_column);
        format!(
            "SELECT\n  {key} AS sender_id,\n  arrayMap(x -> x.2, arraySort(x -> x.1, groupArray(({order}, {value})))) AS events\nFROM {table}\n{where_sql}GROUP BY {key}\nFORMAT JSONEachRow",
            table = self.table,
            where_sql = self.where_sql(),
        )
    }

    /// One row per `key` carrying the maximum of `order_column`, or zero rows
    /// when nothing matches.
    pub fn latest(self, key: &str, order_column: &str) -> String {
        let key = escape_identifier(key);
        let order = escape_identifier(order_column);
        format!(
            "SELECT\n  {key} AS sender_id,\n  max({order}) AS last_timestamp\nFROM {table}\n{where_sql}GROUP BY {key}\nFORMAT JSONEachRow",
            table = self.table,
            where_sql = self.where_sql(),
        )
    }

    pub fn distinct_keys(self, column: &str) -> String {
        let column = escape_identifier(column);
        format!(
            "SELECT DISTINCT {column} AS sender_id\nFROM {table}\n{where_sql}ORDER BY sender_id ASC\nFORMAT JSONEachRow",
            table = self.table,
            where_sql = self.where_sql(),
        )
    }
}
