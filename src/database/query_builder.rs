use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use sqlx::{postgres::PgArguments, postgres::PgRow, FromRow, PgPool, Postgres};
use uuid::Uuid;

use crate::config;
use crate::database::manager::DatabaseError;

/// A bound value. Column names never travel through here, only data.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Uuid(Uuid),
    Date(NaiveDate),
    Json(Value),
    TextArray(Vec<String>),
    Null,
}

/// One page of a list endpoint
#[derive(Debug, Serialize)]
pub struct Paged<T: Serialize> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Builder for parameterized list queries.
///
/// Identifiers (`base`, columns, `order_by`) are `&'static str` so only code
/// can supply them; user input is always pushed as a `SqlParam`.
#[derive(Debug, Clone)]
pub struct ListQuery {
    base: &'static str,
    conditions: Vec<String>,
    params: Vec<SqlParam>,
    order_by: Option<&'static str>,
    limit: i64,
    offset: i64,
}

impl ListQuery {
    pub fn new(base: &'static str) -> Self {
        Self {
            base,
            conditions: vec![],
            params: vec![],
            order_by: None,
            limit: config::config().api.default_page_size,
            offset: 0,
        }
    }

    /// Append a parameter and return its placeholder (`$n`)
    pub fn push_param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub fn where_eq(&mut self, column: &'static str, param: SqlParam) -> &mut Self {
        let placeholder = self.push_param(param);
        self.conditions.push(format!("{} = {}", column, placeholder));
        self
    }

    pub fn where_any(&mut self, column: &'static str, values: Vec<String>) -> &mut Self {
        let placeholder = self.push_param(SqlParam::TextArray(values));
        self.conditions.push(format!("{} = ANY({})", column, placeholder));
        self
    }

    /// Static predicate such as `p.merged_into_person_id IS NULL`
    pub fn where_static(&mut self, predicate: &'static str) -> &mut Self {
        self.conditions.push(predicate.to_string());
        self
    }

    /// Case-insensitive substring match across columns. Blank input is ignored.
    pub fn search(&mut self, columns: &[&'static str], q: Option<&str>) -> &mut Self {
        let Some(q) = q.map(str::trim).filter(|q| !q.is_empty()) else {
            return self;
        };
        if columns.is_empty() {
            return self;
        }
        let pattern = format!("%{}%", escape_like(q));
        let placeholder = self.push_param(SqlParam::Text(pattern));
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("{} ILIKE {} ESCAPE '\\'", c, placeholder))
            .collect();
        self.conditions.push(format!("({})", ors.join(" OR ")));
        self
    }

    pub fn order_by(&mut self, order: &'static str) -> &mut Self {
        self.order_by = Some(order);
        self
    }

    pub fn paginate(&mut self, limit: Option<i64>, offset: Option<i64>) -> Result<&mut Self, DatabaseError> {
        self.paginate_with_max(limit, offset, config::config().api.max_page_size)
    }

    pub fn paginate_with_max(
        &mut self,
        limit: Option<i64>,
        offset: Option<i64>,
        max: i64,
    ) -> Result<&mut Self, DatabaseError> {
        if let Some(limit) = limit {
            if limit < 1 {
                return Err(DatabaseError::InvalidInput(format!("limit must be at least 1, got {}", limit)));
            }
            self.limit = limit.min(max);
        } else {
            self.limit = self.limit.min(max);
        }
        if let Some(offset) = offset {
            if offset < 0 {
                return Err(DatabaseError::InvalidInput(format!("offset must not be negative, got {}", offset)));
            }
            self.offset = offset;
        }
        Ok(self)
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }

    fn filtered(&self) -> String {
        if self.conditions.is_empty() {
            self.base.to_string()
        } else {
            format!("{} WHERE {}", self.base, self.conditions.join(" AND "))
        }
    }

    pub fn to_sql(&self) -> String {
        let mut sql = self.filtered();
        if let Some(order) = self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", self.limit, self.offset));
        sql
    }

    pub fn to_count_sql(&self) -> String {
        format!("SELECT COUNT(*) AS count FROM ({}) AS counted", self.filtered())
    }

    pub async fn fetch_all<T>(&self, pool: &PgPool) -> Result<Vec<T>, DatabaseError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let sql = self.to_sql();
        if config::config().database.enable_query_logging {
            tracing::debug!(sql = %sql, params = self.params.len(), "list query");
        }
        let mut q = sqlx::query_as::<_, T>(&sql);
        for p in &self.params {
            q = bind_param_query_as(q, p);
        }
        Ok(q.fetch_all(pool).await?)
    }

    pub async fn count(&self, pool: &PgPool) -> Result<i64, DatabaseError> {
        let sql = self.to_count_sql();
        let mut q = sqlx::query_scalar::<_, i64>(&sql);
        for p in &self.params {
            q = match p.clone() {
                SqlParam::Text(s) => q.bind(s),
                SqlParam::Int(i) => q.bind(i),
                SqlParam::Float(f) => q.bind(f),
                SqlParam::Bool(b) => q.bind(b),
                SqlParam::Uuid(u) => q.bind(u),
                SqlParam::Date(d) => q.bind(d),
                SqlParam::Json(v) => q.bind(v),
                SqlParam::TextArray(v) => q.bind(v),
                SqlParam::Null => q.bind(Option::<String>::None),
            };
        }
        Ok(q.fetch_one(pool).await?)
    }

    /// Fetch a page and the total row count
    pub async fn fetch_page<T>(&self, pool: &PgPool) -> Result<Paged<T>, DatabaseError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin + Serialize,
    {
        let items = self.fetch_all::<T>(pool).await?;
        let total = self.count(pool).await?;
        Ok(Paged {
            items,
            total,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

pub fn bind_param_query<'q>(
    q: sqlx::query::Query<'q, Postgres, PgArguments>,
    p: &'q SqlParam,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match p {
        SqlParam::Text(s) => q.bind(s.as_str()),
        SqlParam::Int(i) => q.bind(*i),
        SqlParam::Float(f) => q.bind(*f),
        SqlParam::Bool(b) => q.bind(*b),
        SqlParam::Uuid(u) => q.bind(*u),
        SqlParam::Date(d) => q.bind(*d),
        SqlParam::Json(v) => q.bind(v),
        SqlParam::TextArray(v) => q.bind(v),
        SqlParam::Null => q.bind(Option::<String>::None),
    }
}

pub fn bind_param_query_as<'q, O>(
    q: sqlx::query::QueryAs<'q, Postgres, O, PgArguments>,
    p: &'q SqlParam,
) -> sqlx::query::QueryAs<'q, Postgres, O, PgArguments>
where
    O: for<'r> FromRow<'r, PgRow>,
{
    match p {
        SqlParam::Text(s) => q.bind(s.as_str()),
        SqlParam::Int(i) => q.bind(*i),
        SqlParam::Float(f) => q.bind(*f),
        SqlParam::Bool(b) => q.bind(*b),
        SqlParam::Uuid(u) => q.bind(*u),
        SqlParam::Date(d) => q.bind(*d),
        SqlParam::Json(v) => q.bind(v),
        SqlParam::TextArray(v) => q.bind(v),
        SqlParam::Null => q.bind(Option::<String>::None),
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_numbered_placeholders() {
        let mut q = ListQuery::new("SELECT * FROM sot.people p");
        q.where_static("p.merged_into_person_id IS NULL")
            .where_eq("p.do_not_contact", SqlParam::Bool(false))
            .search(&["p.email", "p.display_name"], Some("smith"))
            .order_by("p.created_at DESC");
        q.paginate_with_max(Some(10), Some(20), 100).unwrap();

        let sql = q.to_sql();
        assert!(sql.contains("p.merged_into_person_id IS NULL AND p.do_not_contact = $1 AND (p.email ILIKE $2"));
        assert!(sql.contains("p.display_name ILIKE $2"));
        assert!(sql.ends_with("ORDER BY p.created_at DESC LIMIT 10 OFFSET 20"));
        assert_eq!(q.params()[1], SqlParam::Text("%smith%".to_string()));
    }

    #[test]
    fn blank_search_adds_nothing() {
        let mut q = ListQuery::new("SELECT * FROM sot.cats c");
        q.search(&["c.name"], Some("   ")).search(&["c.name"], None);
        assert!(!q.to_sql().contains("WHERE"));
        assert!(q.params().is_empty());
    }

    #[test]
    fn search_escapes_like_wildcards() {
        let mut q = ListQuery::new("SELECT * FROM sot.cats c");
        q.search(&["c.name"], Some("100%_off"));
        assert_eq!(q.params()[0], SqlParam::Text("%100\\%\\_off%".to_string()));
    }

    #[test]
    fn limit_is_clamped_and_validated() {
        let mut q = ListQuery::new("SELECT 1");
        q.paginate_with_max(Some(10_000), None, 200).unwrap();
        assert_eq!(q.limit(), 200);
        assert!(q.clone().paginate_with_max(Some(0), None, 200).is_err());
        assert!(q.clone().paginate_with_max(None, Some(-1), 200).is_err());
    }

    #[test]
    fn count_sql_wraps_filtered_query() {
        let mut q = ListQuery::new("SELECT r.id FROM ops.requests r");
        q.where_any("r.status", vec!["new".into(), "active".into()]);
        assert_eq!(
            q.to_count_sql(),
            "SELECT COUNT(*) AS count FROM (SELECT r.id FROM ops.requests r WHERE r.status = ANY($1)) AS counted"
        );
    }
}
