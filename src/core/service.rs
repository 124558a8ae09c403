use crate::config::AppConfig;
use crate::core::cache::QueryCache;
use crate::core::stats::{self, MealStats};
use crate::domain::model::{
    Dish, DishTag, DishUpdate, DishWithStats, MealHistory, MealHistoryUpdate, NewDish,
    NewMealHistory, NewSource, NewTag, Profile, ProfileUpdate, Source, SourceUpdate, Tag,
};
use crate::domain::ports::{Backend, Filter, Query};
use crate::domain::rows::{
    self, parse_rows, tables, DishRow, DishTagRow, MealHistoryRow, ProfileRow, SourceRow, TagRow,
};
use crate::utils::error::{MealError, Result};
use crate::utils::validation::Validate;
use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

pub const DEFAULT_TOP_DISHES: usize = 5;

mod keys {
    pub const DISHES: &str = "dishes";
    pub const DISH_TAGS: &str = "dish_tags";
    pub const HISTORY: &str = "history";
    pub const SOURCES: &str = "sources";
    pub const TAGS: &str = "tags";
    pub const PROFILE: &str = "profile";
}

/// 菜色清單的篩選條件
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DishFilter {
    pub query: Option<String>,
    pub cuisine: Option<String>,
    pub tag_id: Option<String>,
    pub source_id: Option<String>,
}

pub fn filter_dishes<'a>(dishes: &'a [Dish], filter: &DishFilter) -> Vec<&'a Dish> {
    let query = filter
        .query
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    dishes
        .iter()
        .filter(|dish| {
            filter
                .cuisine
                .as_deref()
                .map_or(true, |cuisine| dish.has_cuisine(cuisine.trim()))
        })
        .filter(|dish| filter.tag_id.as_deref().map_or(true, |tag| dish.has_tag(tag)))
        .filter(|dish| {
            filter
                .source_id
                .as_deref()
                .map_or(true, |source| dish.source_id.as_deref() == Some(source))
        })
        .filter(|dish| match &query {
            Some(q) => {
                dish.name.to_lowercase().contains(q)
                    || dish.cuisines.iter().any(|c| c.to_lowercase().contains(q))
                    || dish.tags.iter().any(|t| t.name.to_lowercase().contains(q))
            }
            None => true,
        })
        .collect()
}

fn first_row<T>(rows: Vec<T>, entity: &str, id: &str) -> Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| MealError::not_found(entity, id))
}

fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().map_or(true, |obj| obj.is_empty())
}

/// 單一使用者的資料操作，讀取經過查詢快取，寫入後使相關快取失效
pub struct MealService<B: Backend> {
    backend: B,
    user_id: String,
    cache: QueryCache,
}

impl<B: Backend> MealService<B> {
    pub fn new(backend: B, user_id: impl Into<String>) -> Self {
        Self::with_cache(backend, user_id, QueryCache::default())
    }

    pub fn with_cache(backend: B, user_id: impl Into<String>, cache: QueryCache) -> Self {
        Self {
            backend,
            user_id: user_id.into(),
            cache,
        }
    }

    pub fn from_config(backend: B, config: &AppConfig) -> Self {
        let cache = QueryCache::new(config.stale_time(), config.cache_enabled());
        Self::with_cache(backend, config.user_id(), cache)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    fn owned(&self) -> Filter {
        Filter::eq("user_id", self.user_id.as_str())
    }

    fn by_id(&self, id: &str) -> Vec<Filter> {
        vec![Filter::eq("id", id), self.owned()]
    }

    // ---- tags ----

    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        if let Some(tags) = self.cache.get(keys::TAGS).await {
            return Ok(tags);
        }

        let query = Query::new().filter(self.owned()).order_by("name", true);
        let rows = self.backend.select(tables::TAGS, &query).await?;
        let tags: Vec<Tag> = parse_rows::<TagRow>(rows)?
            .into_iter()
            .map(Tag::from)
            .collect();

        self.cache.set(keys::TAGS, &tags).await;
        Ok(tags)
    }

    pub async fn create_tag(&self, tag: NewTag) -> Result<Tag> {
        tag.validate()?;

        let name = tag.name.trim().to_lowercase();
        if self
            .list_tags()
            .await?
            .iter()
            .any(|t| t.name.trim().to_lowercase() == name)
        {
            return Err(MealError::DuplicateError {
                entity: "tag".to_string(),
                name: tag.name.trim().to_string(),
            });
        }

        let rows = self
            .backend
            .insert(tables::TAGS, vec![rows::tag_insert(&self.user_id, &tag)])
            .await?;
        let created: Tag = first_row(parse_rows::<TagRow>(rows)?, "tag", &tag.name)?.into();

        tracing::info!("🏷️ Created tag '{}' ({})", created.name, created.id);
        self.cache.invalidate(keys::TAGS).await;
        Ok(created)
    }

    pub async fn delete_tag(&self, tag_id: &str) -> Result<()> {
        if !self.list_tags().await?.iter().any(|t| t.id == tag_id) {
            return Err(MealError::not_found("tag", tag_id));
        }

        self.backend
            .delete(tables::DISH_TAGS, &[Filter::eq("tag_id", tag_id), self.owned()])
            .await?;
        self.backend.delete(tables::TAGS, &self.by_id(tag_id)).await?;

        tracing::info!("🗑️ Deleted tag {}", tag_id);
        self.cache.invalidate(keys::TAGS).await;
        self.cache.invalidate(keys::DISH_TAGS).await;
        self.cache.invalidate(keys::DISHES).await;
        Ok(())
    }

    pub async fn list_dish_tags(&self) -> Result<Vec<DishTag>> {
        if let Some(links) = self.cache.get(keys::DISH_TAGS).await {
            return Ok(links);
        }

        let query = Query::new().filter(self.owned());
        let rows = self.backend.select(tables::DISH_TAGS, &query).await?;
        let links: Vec<DishTag> = parse_rows::<DishTagRow>(rows)?
            .into_iter()
            .map(DishTag::from)
            .collect();

        self.cache.set(keys::DISH_TAGS, &links).await;
        Ok(links)
    }

    async fn ensure_tags_exist(&self, tag_ids: &[String]) -> Result<()> {
        if tag_ids.is_empty() {
            return Ok(());
        }
        let known: HashSet<String> = self.list_tags().await?.into_iter().map(|t| t.id).collect();
        match tag_ids.iter().find(|id| !known.contains(*id)) {
            Some(missing) => Err(MealError::validation(
                "tagIds",
                format!("unknown tag '{}'", missing),
            )),
            None => Ok(()),
        }
    }

    // ---- dishes ----

    pub async fn list_dishes(&self) -> Result<Vec<Dish>> {
        if let Some(dishes) = self.cache.get(keys::DISHES).await {
            return Ok(dishes);
        }

        let query = Query::new().filter(self.owned()).order_by("name", true);
        let rows = self.backend.select(tables::DISHES, &query).await?;
        let dish_rows = parse_rows::<DishRow>(rows)?;

        let tags: HashMap<String, Tag> = self
            .list_tags()
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let mut tags_by_dish: HashMap<String, Vec<Tag>> = HashMap::new();
        for link in self.list_dish_tags().await? {
            if let Some(tag) = tags.get(&link.tag_id) {
                tags_by_dish.entry(link.dish_id).or_default().push(tag.clone());
            }
        }

        let dishes: Vec<Dish> = dish_rows
            .into_iter()
            .map(|row| {
                let mut dish_tags = tags_by_dish.remove(&row.id).unwrap_or_default();
                dish_tags.sort_by(|a, b| a.name.cmp(&b.name));
                row.into_dish(dish_tags)
            })
            .collect();

        tracing::debug!("Loaded {} dishes", dishes.len());
        self.cache.set(keys::DISHES, &dishes).await;
        Ok(dishes)
    }

    pub async fn get_dish(&self, dish_id: &str) -> Result<Dish> {
        self.list_dishes()
            .await?
            .into_iter()
            .find(|d| d.id == dish_id)
            .ok_or_else(|| MealError::not_found("dish", dish_id))
    }

    pub async fn create_dish(&self, dish: NewDish) -> Result<Dish> {
        dish.validate()?;
        if let Some(source_id) = dish.source_id.as_deref().filter(|s| !s.trim().is_empty()) {
            self.get_source(source_id).await?;
        }
        self.ensure_tags_exist(&dish.tag_ids).await?;

        let rows = self
            .backend
            .insert(tables::DISHES, vec![rows::dish_insert(&self.user_id, &dish)])
            .await?;
        let created = first_row(parse_rows::<DishRow>(rows)?, "dish", &dish.name)?;
        let dish_id = created.id.clone();

        let unique_tags: HashSet<&String> = dish.tag_ids.iter().collect();
        let links: Vec<Value> = unique_tags
            .into_iter()
            .map(|tag_id| {
                rows::dish_tag_insert(
                    &self.user_id,
                    &DishTag {
                        dish_id: dish_id.clone(),
                        tag_id: tag_id.clone(),
                    },
                )
            })
            .collect();
        self.backend.insert(tables::DISH_TAGS, links).await?;

        tracing::info!("🍽️ Created dish '{}' ({})", created.name, dish_id);
        self.cache.invalidate(keys::DISHES).await;
        self.cache.invalidate(keys::DISH_TAGS).await;
        self.get_dish(&dish_id).await
    }

    pub async fn update_dish(&self, dish_id: &str, update: DishUpdate) -> Result<Dish> {
        update.validate()?;
        if let Some(Some(source_id)) = &update.source_id {
            if !source_id.trim().is_empty() {
                self.get_source(source_id).await?;
            }
        }

        let patch = rows::dish_patch(&update);
        if is_empty_patch(&patch) {
            return self.get_dish(dish_id).await;
        }

        let updated = self
            .backend
            .update(tables::DISHES, &self.by_id(dish_id), patch)
            .await?;
        if updated.is_empty() {
            return Err(MealError::not_found("dish", dish_id));
        }

        self.cache.invalidate(keys::DISHES).await;
        self.get_dish(dish_id).await
    }

    /// 刪除菜色及其烹飪紀錄與標籤關聯
    pub async fn delete_dish(&self, dish_id: &str) -> Result<()> {
        let dish = self.get_dish(dish_id).await?;

        self.backend
            .delete(tables::MEAL_HISTORY, &[Filter::eq("dish_id", dish_id), self.owned()])
            .await?;
        self.backend
            .delete(tables::DISH_TAGS, &[Filter::eq("dish_id", dish_id), self.owned()])
            .await?;
        self.backend.delete(tables::DISHES, &self.by_id(dish_id)).await?;

        tracing::info!("🗑️ Deleted dish '{}' ({})", dish.name, dish_id);
        self.cache.invalidate(keys::DISHES).await;
        self.cache.invalidate(keys::DISH_TAGS).await;
        self.cache.invalidate_prefix(keys::HISTORY).await;
        Ok(())
    }

    /// 將菜色的標籤設為 `tag_ids`，只增刪差異的部分
    pub async fn set_dish_tags(&self, dish_id: &str, tag_ids: &[String]) -> Result<Dish> {
        let dish = self.get_dish(dish_id).await?;
        self.ensure_tags_exist(tag_ids).await?;

        let current: HashSet<&str> = dish.tags.iter().map(|t| t.id.as_str()).collect();
        let wanted: HashSet<&str> = tag_ids.iter().map(String::as_str).collect();

        let removed: Vec<&str> = current.difference(&wanted).copied().collect();
        let added: Vec<Value> = wanted
            .difference(&current)
            .map(|tag_id| {
                rows::dish_tag_insert(
                    &self.user_id,
                    &DishTag {
                        dish_id: dish_id.to_string(),
                        tag_id: tag_id.to_string(),
                    },
                )
            })
            .collect();

        if !removed.is_empty() {
            self.backend
                .delete(
                    tables::DISH_TAGS,
                    &[
                        Filter::eq("dish_id", dish_id),
                        Filter::in_list("tag_id", removed.iter().copied()),
                        self.owned(),
                    ],
                )
                .await?;
        }
        self.backend.insert(tables::DISH_TAGS, added).await?;

        self.cache.invalidate(keys::DISH_TAGS).await;
        self.cache.invalidate(keys::DISHES).await;
        self.get_dish(dish_id).await
    }

    pub async fn list_dishes_with_stats(&self) -> Result<Vec<DishWithStats>> {
        let dishes = self.list_dishes().await?;
        let history = self.list_history(None).await?;
        Ok(stats::dish_stats(&dishes, &history))
    }

    // ---- meal history ----

    pub async fn list_history(&self, dish_id: Option<&str>) -> Result<Vec<MealHistory>> {
        let key = match dish_id {
            Some(id) => format!("{}:{}", keys::HISTORY, id),
            None => keys::HISTORY.to_string(),
        };
        if let Some(history) = self.cache.get(&key).await {
            return Ok(history);
        }

        let mut query = Query::new().filter(self.owned());
        if let Some(id) = dish_id {
            query = query.filter(Filter::eq("dish_id", id));
        }
        let query = query.order_by("date", false).order_by("created_at", false);

        let rows = self.backend.select(tables::MEAL_HISTORY, &query).await?;
        let history: Vec<MealHistory> = parse_rows::<MealHistoryRow>(rows)?
            .into_iter()
            .map(MealHistory::from)
            .collect();

        self.cache.set(&key, &history).await;
        Ok(history)
    }

    async fn get_history_entry(&self, entry_id: &str) -> Result<MealHistory> {
        let query = Query::new()
            .filter(Filter::eq("id", entry_id))
            .filter(self.owned());
        let rows = self.backend.select(tables::MEAL_HISTORY, &query).await?;
        Ok(first_row(parse_rows::<MealHistoryRow>(rows)?, "meal history entry", entry_id)?.into())
    }

    pub async fn log_meal(&self, entry: NewMealHistory) -> Result<MealHistory> {
        entry.validate()?;
        let dish = self.get_dish(entry.dish_id.trim()).await?;

        let rows = self
            .backend
            .insert(
                tables::MEAL_HISTORY,
                vec![rows::meal_history_insert(&self.user_id, &entry)],
            )
            .await?;
        let created: MealHistory =
            first_row(parse_rows::<MealHistoryRow>(rows)?, "meal history entry", &dish.id)?.into();

        tracing::info!("🍳 Logged '{}' on {}", dish.name, created.date);
        self.cache.invalidate_prefix(keys::HISTORY).await;
        Ok(created)
    }

    pub async fn update_history_entry(
        &self,
        entry_id: &str,
        update: MealHistoryUpdate,
    ) -> Result<MealHistory> {
        update.validate()?;

        let patch = rows::meal_history_patch(&update);
        if is_empty_patch(&patch) {
            return self.get_history_entry(entry_id).await;
        }

        let rows = self
            .backend
            .update(tables::MEAL_HISTORY, &self.by_id(entry_id), patch)
            .await?;
        let updated =
            first_row(parse_rows::<MealHistoryRow>(rows)?, "meal history entry", entry_id)?;

        self.cache.invalidate_prefix(keys::HISTORY).await;
        Ok(updated.into())
    }

    pub async fn delete_history_entry(&self, entry_id: &str) -> Result<()> {
        self.get_history_entry(entry_id).await?;
        self.backend
            .delete(tables::MEAL_HISTORY, &self.by_id(entry_id))
            .await?;

        self.cache.invalidate_prefix(keys::HISTORY).await;
        Ok(())
    }

    // ---- sources ----

    pub async fn list_sources(&self) -> Result<Vec<Source>> {
        if let Some(sources) = self.cache.get(keys::SOURCES).await {
            return Ok(sources);
        }

        let query = Query::new().filter(self.owned()).order_by("name", true);
        let rows = self.backend.select(tables::SOURCES, &query).await?;
        let sources: Vec<Source> = parse_rows::<SourceRow>(rows)?
            .into_iter()
            .map(Source::from)
            .collect();

        self.cache.set(keys::SOURCES, &sources).await;
        Ok(sources)
    }

    pub async fn get_source(&self, source_id: &str) -> Result<Source> {
        self.list_sources()
            .await?
            .into_iter()
            .find(|s| s.id == source_id)
            .ok_or_else(|| MealError::not_found("source", source_id))
    }

    pub async fn create_source(&self, source: NewSource) -> Result<Source> {
        source.validate()?;

        let rows = self
            .backend
            .insert(tables::SOURCES, vec![rows::source_insert(&self.user_id, &source)])
            .await?;
        let created: Source =
            first_row(parse_rows::<SourceRow>(rows)?, "source", &source.name)?.into();

        tracing::info!("📚 Created {} source '{}'", created.source_type, created.name);
        self.cache.invalidate(keys::SOURCES).await;
        Ok(created)
    }

    pub async fn update_source(&self, source_id: &str, update: SourceUpdate) -> Result<Source> {
        update.validate()?;
        let existing = self.get_source(source_id).await?;
        update.merged_with(&existing).validate()?;

        let patch = rows::source_patch(&update);
        if is_empty_patch(&patch) {
            return Ok(existing);
        }

        let rows = self
            .backend
            .update(tables::SOURCES, &self.by_id(source_id), patch)
            .await?;
        let updated = first_row(parse_rows::<SourceRow>(rows)?, "source", source_id)?;

        self.cache.invalidate(keys::SOURCES).await;
        Ok(updated.into())
    }

    /// 刪除來源，引用它的菜色改為沒有來源
    pub async fn delete_source(&self, source_id: &str) -> Result<()> {
        let source = self.get_source(source_id).await?;

        self.backend
            .update(
                tables::DISHES,
                &[Filter::eq("source_id", source_id), self.owned()],
                json!({ "source_id": null }),
            )
            .await?;
        self.backend.delete(tables::SOURCES, &self.by_id(source_id)).await?;

        tracing::info!("🗑️ Deleted source '{}' ({})", source.name, source_id);
        self.cache.invalidate(keys::SOURCES).await;
        self.cache.invalidate(keys::DISHES).await;
        Ok(())
    }

    // ---- profile ----

    pub async fn get_profile(&self) -> Result<Profile> {
        if let Some(profile) = self.cache.get(keys::PROFILE).await {
            return Ok(profile);
        }

        let query = Query::new().filter(Filter::eq("id", self.user_id.as_str()));
        let rows = self.backend.select(tables::PROFILES, &query).await?;
        let profile: Profile =
            first_row(parse_rows::<ProfileRow>(rows)?, "profile", &self.user_id)?.into();

        self.cache.set(keys::PROFILE, &profile).await;
        Ok(profile)
    }

    /// 更新個人資料；資料列不存在時建立
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Profile> {
        update.validate()?;

        let patch = rows::profile_patch(&update, Utc::now());
        let filters = [Filter::eq("id", self.user_id.as_str())];
        let mut rows = self
            .backend
            .update(tables::PROFILES, &filters, patch.clone())
            .await?;

        if rows.is_empty() {
            let mut row = patch;
            if let Value::Object(obj) = &mut row {
                obj.insert("id".to_string(), json!(self.user_id));
            }
            rows = self.backend.insert(tables::PROFILES, vec![row]).await?;
        }

        let profile: Profile =
            first_row(parse_rows::<ProfileRow>(rows)?, "profile", &self.user_id)?.into();
        self.cache.invalidate(keys::PROFILE).await;
        Ok(profile)
    }

    // ---- statistics ----

    pub async fn get_stats(&self, today: NaiveDate) -> Result<MealStats> {
        let dishes = self.list_dishes().await?;
        let history = self.list_history(None).await?;
        Ok(stats::compute_stats(&dishes, &history, today, DEFAULT_TOP_DISHES))
    }

    pub async fn stale_dishes(&self, today: NaiveDate, days: i64) -> Result<Vec<DishWithStats>> {
        let with_stats = self.list_dishes_with_stats().await?;
        Ok(stats::stale_dishes(&with_stats, today, days)?
            .into_iter()
            .cloned()
            .collect())
    }
}
