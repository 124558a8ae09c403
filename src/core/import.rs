use crate::core::export::{ExportBundle, EXPORT_VERSION};
use crate::core::service::MealService;
use crate::core::{Pipeline, Storage};
use crate::domain::model::{DishTag, NewDish, NewMealHistory, NewSource, NewTag};
use crate::domain::ports::{cell_text, Backend};
use crate::domain::rows::{self, tables};
use crate::utils::error::{MealError, Result};
use crate::utils::validation::Validate;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    pub entity: String,
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCount {
    pub inserted: usize,
    pub reused: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub sources: EntityCount,
    pub tags: EntityCount,
    pub dishes: EntityCount,
    pub dish_tags: EntityCount,
    pub meal_history: EntityCount,
    pub skipped: Vec<SkippedRecord>,
}

impl ImportReport {
    pub fn total_inserted(&self) -> usize {
        self.sources.inserted
            + self.tags.inserted
            + self.dishes.inserted
            + self.dish_tags.inserted
            + self.meal_history.inserted
    }

    fn skip(&mut self, entity: &str, id: &str, reason: impl Into<String>) {
        let count = match entity {
            "source" => &mut self.sources.skipped,
            "tag" => &mut self.tags.skipped,
            "dish" => &mut self.dishes.skipped,
            "dish tag" => &mut self.dish_tags.skipped,
            _ => &mut self.meal_history.skipped,
        };
        *count += 1;

        let reason = reason.into();
        tracing::warn!("⏭️ Skipping {} {}: {}", entity, id, reason);
        self.skipped.push(SkippedRecord {
            entity: entity.to_string(),
            id: id.to_string(),
            reason,
        });
    }
}

/// 已驗證、尚未寫入的匯入內容；id 仍是檔案中的舊 id
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub sources: Vec<(String, NewSource)>,
    pub tags: Vec<(String, NewTag)>,
    pub dishes: Vec<(String, NewDish)>,
    pub dish_tags: Vec<DishTag>,
    pub meal_history: Vec<(String, NewMealHistory)>,
    pub report: ImportReport,
}

/// 解析匯入檔，拒絕不支援的版本
pub fn parse_bundle(bytes: &[u8]) -> Result<ExportBundle> {
    let raw: Value = serde_json::from_slice(bytes)?;
    match raw.get("version") {
        Some(version) if version.as_u64() == Some(u64::from(EXPORT_VERSION)) => {}
        Some(Value::Null) | None => {
            return Err(MealError::ImportError {
                message: "missing export version".to_string(),
            })
        }
        Some(other) => {
            return Err(MealError::ImportError {
                message: format!("unsupported export version {}", other),
            })
        }
    }
    Ok(serde_json::from_value(raw)?)
}

pub fn plan_import(bundle: ExportBundle, today: NaiveDate) -> ImportPlan {
    let mut plan = ImportPlan::default();

    for source in bundle.sources {
        let new = NewSource {
            name: source.name,
            source_type: source.source_type,
            url: source.url,
        };
        match new.validate() {
            Ok(()) => plan.sources.push((source.id, new)),
            Err(e) => plan.report.skip("source", &source.id, e.to_string()),
        }
    }

    for tag in bundle.tags {
        let new = NewTag {
            name: tag.name,
            color: tag.color,
        };
        match new.validate() {
            Ok(()) => plan.tags.push((tag.id, new)),
            Err(e) => plan.report.skip("tag", &tag.id, e.to_string()),
        }
    }

    // 舊版匯出只在菜色上帶標籤
    let mut links: Vec<DishTag> = bundle.dish_tags;
    if links.is_empty() {
        links = bundle
            .dishes
            .iter()
            .flat_map(|dish| {
                dish.tags.iter().map(|tag| DishTag {
                    dish_id: dish.id.clone(),
                    tag_id: tag.id.clone(),
                })
            })
            .collect();
    }

    for dish in bundle.dishes {
        let new = NewDish {
            name: dish.name,
            cuisines: dish.cuisines,
            source_id: dish.source_id,
            location: dish.location,
            tag_ids: Vec::new(),
        };
        match new.validate() {
            Ok(()) => plan.dishes.push((dish.id, new)),
            Err(e) => plan.report.skip("dish", &dish.id, e.to_string()),
        }
    }

    let mut seen = HashSet::new();
    plan.dish_tags = links
        .into_iter()
        .filter(|link| seen.insert(link.clone()))
        .collect();

    for entry in bundle.meal_history {
        let new = NewMealHistory {
            dish_id: entry.dish_id,
            date: entry.date,
            notes: entry.notes,
        };
        match new.validate_on(today) {
            Ok(()) => plan.meal_history.push((entry.id, new)),
            Err(e) => plan.report.skip("meal", &entry.id, e.to_string()),
        }
    }

    plan
}

pub struct ImportPipeline<'a, B: Backend, S: Storage> {
    service: &'a MealService<B>,
    storage: S,
    path: String,
    batch_size: usize,
    today: NaiveDate,
}

impl<'a, B: Backend, S: Storage> ImportPipeline<'a, B, S> {
    pub fn new(
        service: &'a MealService<B>,
        storage: S,
        path: impl Into<String>,
        batch_size: usize,
        today: NaiveDate,
    ) -> Self {
        Self {
            service,
            storage,
            path: path.into(),
            batch_size: batch_size.max(1),
            today,
        }
    }

    /// 分批寫入，回傳與輸入同順序的新 id；筆數不符時中止匯入
    async fn insert_batches(&self, table: &str, payloads: Vec<Value>) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(payloads.len());
        for (index, chunk) in payloads.chunks(self.batch_size).enumerate() {
            let inserted = self
                .service
                .backend()
                .insert(table, chunk.to_vec())
                .await?;
            if inserted.len() != chunk.len() {
                return Err(MealError::ImportError {
                    message: format!(
                        "{}: batch {} returned {} rows for {} records",
                        table,
                        index,
                        inserted.len(),
                        chunk.len()
                    ),
                });
            }
            ids.extend(inserted.iter().map(|row| cell_text(row, "id").unwrap_or_default()));
            tracing::debug!("{}: inserted batch {} ({} rows)", table, index, chunk.len());
        }
        Ok(ids)
    }
}

#[async_trait]
impl<'a, B: Backend, S: Storage> Pipeline for ImportPipeline<'a, B, S> {
    type Extracted = ExportBundle;
    type Transformed = ImportPlan;
    type Output = ImportReport;

    async fn extract(&self) -> Result<ExportBundle> {
        let bytes = self.storage.read_file(&self.path).await?;
        let bundle = parse_bundle(&bytes)?;
        tracing::info!(
            "📥 Read export from {} ({} dishes, {} meals)",
            bundle.exported_at,
            bundle.dishes.len(),
            bundle.meal_history.len()
        );
        Ok(bundle)
    }

    async fn transform(&self, bundle: ExportBundle) -> Result<ImportPlan> {
        Ok(plan_import(bundle, self.today))
    }

    async fn load(&self, plan: ImportPlan) -> Result<ImportReport> {
        let user_id = self.service.user_id();
        let mut report = plan.report;

        // sources
        let payloads = plan
            .sources
            .iter()
            .map(|(_, s)| rows::source_insert(user_id, s))
            .collect();
        let new_ids = self.insert_batches(tables::SOURCES, payloads).await?;
        let source_map: HashMap<String, String> = plan
            .sources
            .iter()
            .map(|(old, _)| old.clone())
            .zip(new_ids)
            .collect();
        report.sources.inserted = source_map.len();

        // tags：同名（不分大小寫）沿用既有標籤
        let mut tag_map: HashMap<String, String> = HashMap::new();
        let by_name: HashMap<String, String> = self
            .service
            .list_tags()
            .await?
            .into_iter()
            .map(|t| (t.name.trim().to_lowercase(), t.id))
            .collect();
        let mut pending: Vec<(String, NewTag)> = Vec::new();
        let mut pending_names: HashMap<String, Vec<String>> = HashMap::new();
        for (old_id, tag) in plan.tags {
            let key = tag.name.trim().to_lowercase();
            if let Some(existing) = by_name.get(&key) {
                tag_map.insert(old_id, existing.clone());
                report.tags.reused += 1;
            } else if let Some(aliases) = pending_names.get_mut(&key) {
                aliases.push(old_id);
                report.tags.reused += 1;
            } else {
                pending_names.insert(key, vec![old_id.clone()]);
                pending.push((old_id, tag));
            }
        }
        let payloads = pending
            .iter()
            .map(|(_, t)| rows::tag_insert(user_id, t))
            .collect();
        let new_ids = self.insert_batches(tables::TAGS, payloads).await?;
        for ((_, tag), new_id) in pending.iter().zip(new_ids) {
            let key = tag.name.trim().to_lowercase();
            for old_id in pending_names.remove(&key).unwrap_or_default() {
                tag_map.insert(old_id, new_id.clone());
            }
        }
        report.tags.inserted = pending.len();

        // dishes
        let mut dishes = plan.dishes;
        for (old_id, dish) in dishes.iter_mut() {
            if let Some(source_id) = dish.source_id.take() {
                dish.source_id = source_map.get(&source_id).cloned();
                if dish.source_id.is_none() {
                    tracing::warn!("Dish {} lost unknown source {}", old_id, source_id);
                }
            }
        }
        let payloads = dishes
            .iter()
            .map(|(_, d)| rows::dish_insert(user_id, d))
            .collect();
        let new_ids = self.insert_batches(tables::DISHES, payloads).await?;
        let dish_map: HashMap<String, String> = dishes
            .iter()
            .map(|(old, _)| old.clone())
            .zip(new_ids)
            .collect();
        report.dishes.inserted = dish_map.len();

        // dish tags
        let mut links = Vec::new();
        let mut seen = HashSet::new();
        for link in plan.dish_tags {
            let label = format!("{}/{}", link.dish_id, link.tag_id);
            let (Some(dish_id), Some(tag_id)) =
                (dish_map.get(&link.dish_id), tag_map.get(&link.tag_id))
            else {
                report.skip("dish tag", &label, "references a dish or tag that was not imported");
                continue;
            };
            let remapped = DishTag {
                dish_id: dish_id.clone(),
                tag_id: tag_id.clone(),
            };
            if seen.insert(remapped.clone()) {
                links.push(rows::dish_tag_insert(user_id, &remapped));
            }
        }
        report.dish_tags.inserted = self
            .insert_batches(tables::DISH_TAGS, links)
            .await?
            .len();

        // meal history
        let mut payloads = Vec::new();
        for (old_id, mut entry) in plan.meal_history {
            match dish_map.get(&entry.dish_id) {
                Some(dish_id) => {
                    entry.dish_id = dish_id.clone();
                    payloads.push(rows::meal_history_insert(user_id, &entry));
                }
                None => {
                    let reason = format!("unknown dish '{}'", entry.dish_id);
                    report.skip("meal", &old_id, reason);
                }
            }
        }
        report.meal_history.inserted = self
            .insert_batches(tables::MEAL_HISTORY, payloads)
            .await?
            .len();

        self.service.cache().clear().await;
        tracing::info!(
            "✅ Imported {} records, skipped {}",
            report.total_inserted(),
            report.skipped.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryBackend, LocalStorage};
    use crate::domain::ports::{Filter, Query};
    use serde_json::json;

    /// 寫入 dish_tags 時只回傳部分資料列的後端
    struct ShortLinkBackend {
        inner: InMemoryBackend,
    }

    #[async_trait]
    impl Backend for ShortLinkBackend {
        async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
            self.inner.select(table, query).await
        }

        async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>> {
            let mut inserted = self.inner.insert(table, rows).await?;
            if table == tables::DISH_TAGS {
                inserted.truncate(1);
            }
            Ok(inserted)
        }

        async fn update(&self, table: &str, filters: &[Filter], patch: Value) -> Result<Vec<Value>> {
            self.inner.update(table, filters, patch).await
        }

        async fn delete(&self, table: &str, filters: &[Filter]) -> Result<()> {
            self.inner.delete(table, filters).await
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bundle_json() -> Value {
        json!({
            "version": 1,
            "exportedAt": "2024-06-01T12:00:00Z",
            "sources": [
                {"id": "s1", "userId": "old", "name": "Blog", "type": "website", "url": "https://food.example.com", "createdAt": "2024-01-01T00:00:00Z"},
                {"id": "s2", "userId": "old", "name": "Broken", "type": "website", "createdAt": "2024-01-01T00:00:00Z"}
            ],
            "tags": [
                {"id": "t1", "userId": "old", "name": "Quick", "createdAt": "2024-01-01T00:00:00Z"}
            ],
            "dishes": [
                {"id": "d1", "userId": "old", "name": "Fried Rice", "cuisines": ["Chinese"], "sourceId": "s2", "createdAt": "2024-01-01T00:00:00Z",
                 "tags": [{"id": "t1", "userId": "old", "name": "Quick", "createdAt": "2024-01-01T00:00:00Z"}]},
                {"id": "d2", "userId": "old", "name": "   ", "createdAt": "2024-01-01T00:00:00Z"}
            ],
            "mealHistory": [
                {"id": "h1", "userId": "old", "dishId": "d1", "date": "2024-05-01", "createdAt": "2024-05-01T00:00:00Z"},
                {"id": "h2", "userId": "old", "dishId": "d1", "date": "2030-01-01", "createdAt": "2024-05-01T00:00:00Z"}
            ]
        })
    }

    #[test]
    fn test_parse_bundle_rejects_unknown_version() {
        let mut raw = bundle_json();
        raw["version"] = json!(2);
        let err = parse_bundle(raw.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, MealError::ImportError { .. }));
        assert!(err.to_string().contains("unsupported export version 2"));

        let err = parse_bundle(br#"{"dishes": []}"#).unwrap_err();
        assert!(err.to_string().contains("missing export version"));

        raw["version"] = json!(1.0);
        let err = parse_bundle(raw.to_string().as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unsupported export version 1.0"));
    }

    #[tokio::test]
    async fn test_short_link_batch_fails_import() {
        let service = MealService::new(
            ShortLinkBackend {
                inner: InMemoryBackend::new(),
            },
            "u1",
        );
        let pipeline = ImportPipeline::new(
            &service,
            LocalStorage::new("unused"),
            "unused.json",
            10,
            date(2024, 6, 1),
        );

        let mut raw = bundle_json();
        raw["tags"] = json!([
            {"id": "t1", "userId": "old", "name": "Quick", "createdAt": "2024-01-01T00:00:00Z"},
            {"id": "t2", "userId": "old", "name": "Cheap", "createdAt": "2024-01-01T00:00:00Z"}
        ]);
        raw["dishTags"] = json!([
            {"dishId": "d1", "tagId": "t1"},
            {"dishId": "d1", "tagId": "t2"}
        ]);
        let bundle = parse_bundle(raw.to_string().as_bytes()).unwrap();
        let plan = pipeline.transform(bundle).await.unwrap();

        let err = pipeline.load(plan).await.unwrap_err();
        assert!(matches!(err, MealError::ImportError { .. }));
        assert!(err.to_string().contains("dish_tags: batch 0 returned 1 rows for 2 records"));
    }

    #[test]
    fn test_plan_skips_invalid_records() {
        let bundle = parse_bundle(bundle_json().to_string().as_bytes()).unwrap();
        let plan = plan_import(bundle, date(2024, 6, 1));

        assert_eq!(plan.sources.len(), 1);
        assert_eq!(plan.tags.len(), 1);
        assert_eq!(plan.dishes.len(), 1);
        assert_eq!(plan.meal_history.len(), 1);
        // falls back to the tags carried on each dish
        assert_eq!(
            plan.dish_tags,
            vec![DishTag {
                dish_id: "d1".to_string(),
                tag_id: "t1".to_string()
            }]
        );

        let skipped: Vec<(&str, &str)> = plan
            .report
            .skipped
            .iter()
            .map(|s| (s.entity.as_str(), s.id.as_str()))
            .collect();
        assert_eq!(skipped, vec![("source", "s2"), ("dish", "d2"), ("meal", "h2")]);
        assert_eq!(plan.report.sources.skipped, 1);
        assert_eq!(plan.report.meal_history.skipped, 1);
    }
}
