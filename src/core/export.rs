use crate::core::service::MealService;
use crate::core::{Pipeline, Storage};
use crate::domain::model::{Dish, DishTag, MealHistory, Source, Tag};
use crate::domain::ports::{Backend, Filter, Query};
use crate::domain::rows::{
    parse_rows, tables, DishRow, DishTagRow, MealHistoryRow, SourceRow, TagRow,
};
use crate::utils::error::{MealError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub const EXPORT_VERSION: u32 = 1;
pub const EXPORT_FILENAME: &str = "meal-tracker-export.json";
pub const HISTORY_CSV_FILENAME: &str = "meal-history.csv";

/// 匯出/匯入共用的 JSON 檔案格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub dishes: Vec<Dish>,
    #[serde(default)]
    pub dish_tags: Vec<DishTag>,
    #[serde(default)]
    pub meal_history: Vec<MealHistory>,
}

#[derive(Debug, Clone, Default)]
pub struct ExportSnapshot {
    pub sources: Vec<SourceRow>,
    pub tags: Vec<TagRow>,
    pub dishes: Vec<DishRow>,
    pub dish_tags: Vec<DishTagRow>,
    pub meal_history: Vec<MealHistoryRow>,
}

#[derive(Debug, Clone)]
pub struct ExportData {
    pub bundle: ExportBundle,
    pub history_csv: String,
    pub dropped_references: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub json_path: String,
    pub csv_path: String,
    pub dishes: usize,
    pub meals: usize,
    pub dropped_references: usize,
}

/// 逐頁讀取整張資料表，直到某頁不足 `page_size`
pub async fn fetch_all_pages<B, R>(
    backend: &B,
    table: &str,
    base_query: &Query,
    page_size: usize,
) -> Result<Vec<R>>
where
    B: Backend + ?Sized,
    R: DeserializeOwned,
{
    let page_size = page_size.max(1);
    let mut rows: Vec<Value> = Vec::new();
    let mut page = 0;

    loop {
        let query = base_query.clone().page(page, page_size);
        let batch = backend.select(table, &query).await?;
        let fetched = batch.len();
        rows.extend(batch);
        tracing::debug!("{}: page {} returned {} rows", table, page, fetched);

        if fetched < page_size {
            break;
        }
        page += 1;
    }

    parse_rows(rows)
}

pub fn history_csv(history: &[MealHistory], dishes: &[Dish]) -> Result<String> {
    let names: HashMap<&str, &str> = dishes
        .iter()
        .map(|d| (d.id.as_str(), d.name.as_str()))
        .collect();

    let mut sorted: Vec<&MealHistory> = history.iter().collect();
    sorted.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["date", "dish", "notes"])?;
    for entry in sorted {
        let date = entry.date.format("%Y-%m-%d").to_string();
        writer.write_record([
            date.as_str(),
            names.get(entry.dish_id.as_str()).copied().unwrap_or(""),
            entry.notes.as_deref().unwrap_or(""),
        ])?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| MealError::IoError(e.into_error()))?;
    String::from_utf8(bytes).map_err(|e| MealError::ImportError {
        message: format!("CSV output is not UTF-8: {}", e),
    })
}

pub struct ExportPipeline<'a, B: Backend, S: Storage> {
    service: &'a MealService<B>,
    storage: S,
    page_size: usize,
}

impl<'a, B: Backend, S: Storage> ExportPipeline<'a, B, S> {
    pub fn new(service: &'a MealService<B>, storage: S, page_size: usize) -> Self {
        Self {
            service,
            storage,
            page_size,
        }
    }

    fn owned_query(&self) -> Query {
        Query::new()
            .filter(Filter::eq("user_id", self.service.user_id()))
            .order_by("id", true)
    }
}

#[async_trait]
impl<'a, B: Backend, S: Storage> Pipeline for ExportPipeline<'a, B, S> {
    type Extracted = ExportSnapshot;
    type Transformed = ExportData;
    type Output = ExportSummary;

    async fn extract(&self) -> Result<ExportSnapshot> {
        let backend = self.service.backend();
        let query = self.owned_query();

        let snapshot = ExportSnapshot {
            sources: fetch_all_pages(backend, tables::SOURCES, &query, self.page_size).await?,
            tags: fetch_all_pages(backend, tables::TAGS, &query, self.page_size).await?,
            dishes: fetch_all_pages(backend, tables::DISHES, &query, self.page_size).await?,
            dish_tags: fetch_all_pages(
                backend,
                tables::DISH_TAGS,
                &Query::new()
                    .filter(Filter::eq("user_id", self.service.user_id()))
                    .order_by("dish_id", true)
                    .order_by("tag_id", true),
                self.page_size,
            )
            .await?,
            meal_history: fetch_all_pages(backend, tables::MEAL_HISTORY, &query, self.page_size)
                .await?,
        };

        tracing::info!(
            "📥 Read {} dishes, {} meals, {} sources, {} tags",
            snapshot.dishes.len(),
            snapshot.meal_history.len(),
            snapshot.sources.len(),
            snapshot.tags.len()
        );
        Ok(snapshot)
    }

    async fn transform(&self, data: ExportSnapshot) -> Result<ExportData> {
        let mut dropped = 0;

        let sources: Vec<Source> = data.sources.into_iter().map(Source::from).collect();
        let tags: Vec<Tag> = data.tags.into_iter().map(Tag::from).collect();
        let source_ids: HashSet<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        let tags_by_id: HashMap<&str, &Tag> = tags.iter().map(|t| (t.id.as_str(), t)).collect();
        let dish_ids: HashSet<String> = data.dishes.iter().map(|d| d.id.clone()).collect();

        let mut seen_links = HashSet::new();
        let dish_tags: Vec<DishTag> = data
            .dish_tags
            .into_iter()
            .map(DishTag::from)
            .filter(|link| {
                let valid = dish_ids.contains(&link.dish_id)
                    && tags_by_id.contains_key(link.tag_id.as_str())
                    && seen_links.insert(link.clone());
                if !valid {
                    dropped += 1;
                }
                valid
            })
            .collect();

        let mut tags_by_dish: HashMap<&str, Vec<Tag>> = HashMap::new();
        for link in &dish_tags {
            if let Some(tag) = tags_by_id.get(link.tag_id.as_str()) {
                tags_by_dish
                    .entry(link.dish_id.as_str())
                    .or_default()
                    .push((*tag).clone());
            }
        }

        let mut dishes: Vec<Dish> = data
            .dishes
            .into_iter()
            .map(|row| {
                let mut dish_tags_for = tags_by_dish.remove(row.id.as_str()).unwrap_or_default();
                dish_tags_for.sort_by(|a, b| a.name.cmp(&b.name));
                let mut dish = row.into_dish(dish_tags_for);
                if let Some(source_id) = &dish.source_id {
                    if !source_ids.contains(source_id.as_str()) {
                        tracing::warn!("Dish {} points at missing source {}", dish.id, source_id);
                        dish.source_id = None;
                        dropped += 1;
                    }
                }
                dish
            })
            .collect();
        dishes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let mut meal_history: Vec<MealHistory> = data
            .meal_history
            .into_iter()
            .map(MealHistory::from)
            .filter(|entry| {
                let known = dish_ids.contains(&entry.dish_id);
                if !known {
                    dropped += 1;
                }
                known
            })
            .collect();
        meal_history.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));

        let history_csv = history_csv(&meal_history, &dishes)?;

        Ok(ExportData {
            bundle: ExportBundle {
                version: EXPORT_VERSION,
                exported_at: Utc::now(),
                sources,
                tags,
                dishes,
                dish_tags,
                meal_history,
            },
            history_csv,
            dropped_references: dropped,
        })
    }

    async fn load(&self, data: ExportData) -> Result<ExportSummary> {
        let json = serde_json::to_string_pretty(&data.bundle)?;
        self.storage
            .write_file(EXPORT_FILENAME, json.as_bytes())
            .await?;
        self.storage
            .write_file(HISTORY_CSV_FILENAME, data.history_csv.as_bytes())
            .await?;

        if data.dropped_references > 0 {
            tracing::warn!(
                "⚠️ Dropped {} dangling references during export",
                data.dropped_references
            );
        }

        Ok(ExportSummary {
            json_path: EXPORT_FILENAME.to_string(),
            csv_path: HISTORY_CSV_FILENAME.to_string(),
            dishes: data.bundle.dishes.len(),
            meals: data.bundle.meal_history.len(),
            dropped_references: data.dropped_references,
        })
    }
}
