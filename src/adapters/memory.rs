use crate::domain::ports::{cell_text, compare_cells, Backend, Filter, Query};
use crate::domain::rows::tables::DISH_TAGS;
use crate::utils::error::{MealError, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// 行程內的後端實作，離線使用與測試共用
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    next_id: Arc<AtomicU64>,
    selects: Arc<AtomicUsize>,
}

fn compare_rows(a: &Value, b: &Value, query: &Query) -> CmpOrdering {
    for order in &query.order {
        let ordering = match (cell_text(a, &order.column), cell_text(b, &order.column)) {
            (Some(x), Some(y)) => compare_cells(&x, &y),
            (x, y) => x.cmp(&y),
        };
        let ordering = if order.ascending {
            ordering
        } else {
            ordering.reverse()
        };
        if ordering != CmpOrdering::Equal {
            return ordering;
        }
    }
    CmpOrdering::Equal
}

fn duplicate_link(rows: &[Value], row: &Value) -> bool {
    rows.iter().any(|existing| {
        cell_text(existing, "dish_id") == cell_text(row, "dish_id")
            && cell_text(existing, "tag_id") == cell_text(row, "tag_id")
    })
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接寫入資料列，不經過 id 分配
    pub async fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut tables = self.tables.lock().await;
        tables.entry(table.to_string()).or_default().extend(rows);
    }

    pub async fn rows(&self, table: &str) -> Vec<Value> {
        let tables = self.tables.lock().await;
        tables.get(table).cloned().unwrap_or_default()
    }

    /// 已執行的 select 次數，用於觀察快取是否生效
    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock().await;

        let mut rows: Vec<Value> = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| compare_rows(a, b, query));

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    /// 整批寫入：任何一列失敗時整批都不保存
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
        let mut tables = self.tables.lock().await;
        let stored = tables.entry(table.to_string()).or_default();
        let mut inserted: Vec<Value> = Vec::with_capacity(rows.len());

        for row in rows {
            let Value::Object(mut obj) = row else {
                return Err(MealError::ApiError {
                    status: 400,
                    code: Some("PGRST102".to_string()),
                    message: "All object keys must match".to_string(),
                    details: None,
                    hint: None,
                });
            };

            if table == DISH_TAGS {
                let candidate = Value::Object(obj.clone());
                if duplicate_link(stored, &candidate) || duplicate_link(&inserted, &candidate) {
                    return Err(MealError::ApiError {
                        status: 409,
                        code: Some("23505".to_string()),
                        message: "duplicate key value violates unique constraint".to_string(),
                        details: None,
                        hint: None,
                    });
                }
            } else if !obj.contains_key("id") {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                obj.insert("id".to_string(), Value::String(id.to_string()));
            }

            if !obj.contains_key("created_at") {
                obj.insert(
                    "created_at".to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
            }

            inserted.push(Value::Object(obj));
        }

        stored.extend(inserted.iter().cloned());
        Ok(inserted)
    }

    async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
        if filters.is_empty() {
            return Err(MealError::validation(
                "filters",
                format!("refusing unfiltered update on '{}'", table),
            ));
        }

        let mut tables = self.tables.lock().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };
        let Value::Object(patch) = patch else {
            return Err(MealError::validation("patch", "must be a JSON object"));
        };

        let mut updated = Vec::new();
        for row in rows.iter_mut() {
            if !filters.iter().all(|f| f.matches(row)) {
                continue;
            }
            if let Value::Object(obj) = row {
                for (key, value) in &patch {
                    obj.insert(key.clone(), value.clone());
                }
            }
            updated.push(row.clone());
        }

        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
        if filters.is_empty() {
            return Err(MealError::validation(
                "filters",
                format!("refusing unfiltered delete on '{}'", table),
            ));
        }

        let mut tables = self.tables.lock().await;
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|row| !filters.iter().all(|f| f.matches(row)));
        }
        Ok(())
    }
}
