use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 託管關聯式後端的資料表存取介面
#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>>;
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>>;
    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>>;
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()>;
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    type Extracted: Send;
    type Transformed: Send;
    type Output: Send;

    async fn extract(&self) -> Result<Self::Extracted>;
    async fn transform(&self, data: Self::Extracted) -> Result<Self::Transformed>;
    async fn load(&self, data: Self::Transformed) -> Result<Self::Output>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    Gte,
    Lte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub values: Vec<String>,
}

pub(crate) fn cell_text(row: &Value, column: &str) -> Option<String> {
    match row.get(column)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// 兩邊都是數字時依數值比較，否則依字串比較；數字排在文字之前
pub(crate) fn compare_cells(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Eq,
            values: vec![value.into()],
        }
    }

    pub fn in_list<I, S>(column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            column: column.to_string(),
            op: FilterOp::In,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn gte(column: &str, value: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Gte,
            values: vec![value.into()],
        }
    }

    pub fn lte(column: &str, value: impl Into<String>) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Lte,
            values: vec![value.into()],
        }
    }

    /// PostgREST 查詢參數，例如 `dish_id=eq.42`、`id=in.(1,2)`
    pub fn to_param(&self) -> (String, String) {
        let first = self.values.first().cloned().unwrap_or_default();
        let value = match self.op {
            FilterOp::Eq => format!("eq.{}", first),
            FilterOp::Gte => format!("gte.{}", first),
            FilterOp::Lte => format!("lte.{}", first),
            FilterOp::In => format!("in.({})", self.values.join(",")),
        };
        (self.column.clone(), value)
    }

    pub fn matches(&self, row: &Value) -> bool {
        let Some(cell) = cell_text(row, &self.column) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => self.values.first().is_some_and(|v| *v == cell),
            FilterOp::In => self.values.iter().any(|v| *v == cell),
            FilterOp::Gte => self
                .values
                .first()
                .is_some_and(|v| compare_cells(&cell, v) != Ordering::Less),
            FilterOp::Lte => self
                .values
                .first()
                .is_some_and(|v| compare_cells(&cell, v) != Ordering::Greater),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub select: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.select = Some(columns.to_string());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// 第 `page` 頁（從 0 開始）
    pub fn page(self, page: usize, page_size: usize) -> Self {
        self.limit(page_size).offset(page * page_size)
    }

    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![(
            "select".to_string(),
            self.select.clone().unwrap_or_else(|| "*".to_string()),
        )];
        params.extend(self.filters.iter().map(Filter::to_param));
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }
        params
    }
}
