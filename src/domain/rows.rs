//! 後端資料列（snake_case、可為 null）與領域實體之間的轉換。

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::model::{
    Dish, DishTag, DishUpdate, MealHistory, MealHistoryUpdate, NewDish, NewMealHistory,
    NewSource, NewTag, Profile, ProfileUpdate, Source, SourceType, SourceUpdate, Tag,
};
use crate::utils::error::{MealError, Result};

pub mod tables {
    pub const DISHES: &str = "dishes";
    pub const MEAL_HISTORY: &str = "meal_history";
    pub const SOURCES: &str = "sources";
    pub const TAGS: &str = "tags";
    pub const DISH_TAGS: &str = "dish_tags";
    pub const PROFILES: &str = "profiles";
}

/// 後端 id 可能是 uuid 字串或整數
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Int(n) => n.to_string(),
        }
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    RawId::deserialize(deserializer).map(String::from)
}

fn de_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

/// 去除前後空白，空字串視為 None
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn optional_value(value: Option<&str>) -> Value {
    match normalize_optional(value.map(str::to_string)) {
        Some(v) => Value::String(v),
        None => Value::Null,
    }
}

pub fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(MealError::from))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DishRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(deserialize_with = "de_id")]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub cuisines: Option<Vec<String>>,
    #[serde(default, deserialize_with = "de_opt_id")]
    pub source_id: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DishRow {
    pub fn into_dish(self, tags: Vec<Tag>) -> Dish {
        Dish {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            cuisines: self.cuisines.unwrap_or_default(),
            source_id: self.source_id,
            location: normalize_optional(self.location),
            created_at: self.created_at,
            tags,
        }
    }
}

impl From<DishRow> for Dish {
    fn from(row: DishRow) -> Self {
        row.into_dish(Vec::new())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MealHistoryRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(deserialize_with = "de_id")]
    pub dish_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<MealHistoryRow> for MealHistory {
    fn from(row: MealHistoryRow) -> Self {
        MealHistory {
            id: row.id,
            user_id: row.user_id,
            dish_id: row.dish_id,
            date: row.date,
            notes: normalize_optional(row.notes),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(deserialize_with = "de_id")]
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            source_type: row.source_type,
            url: normalize_optional(row.url),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(deserialize_with = "de_id")]
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<TagRow> for Tag {
    fn from(row: TagRow) -> Self {
        Tag {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            color: normalize_optional(row.color),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DishTagRow {
    #[serde(deserialize_with = "de_id")]
    pub dish_id: String,
    #[serde(deserialize_with = "de_id")]
    pub tag_id: String,
}

impl From<DishTagRow> for DishTag {
    fn from(row: DishTagRow) -> Self {
        DishTag {
            dish_id: row.dish_id,
            tag_id: row.tag_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRow {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            id: row.id,
            username: normalize_optional(row.username),
            avatar_url: normalize_optional(row.avatar_url),
            updated_at: row.updated_at,
        }
    }
}

// ---- 寫入 payload ----

pub fn dish_insert(user_id: &str, dish: &NewDish) -> Value {
    json!({
        "user_id": user_id,
        "name": dish.name.trim(),
        "cuisines": normalize_list(&dish.cuisines),
        "source_id": optional_value(dish.source_id.as_deref()),
        "location": optional_value(dish.location.as_deref()),
    })
}

pub fn dish_patch(update: &DishUpdate) -> Value {
    let mut patch = Map::new();
    if let Some(name) = &update.name {
        patch.insert("name".to_string(), json!(name.trim()));
    }
    if let Some(cuisines) = &update.cuisines {
        patch.insert("cuisines".to_string(), json!(normalize_list(cuisines)));
    }
    if let Some(source_id) = &update.source_id {
        patch.insert("source_id".to_string(), optional_value(source_id.as_deref()));
    }
    if let Some(location) = &update.location {
        patch.insert("location".to_string(), optional_value(location.as_deref()));
    }
    Value::Object(patch)
}

pub fn meal_history_insert(user_id: &str, entry: &NewMealHistory) -> Value {
    json!({
        "user_id": user_id,
        "dish_id": entry.dish_id.trim(),
        "date": entry.date.format("%Y-%m-%d").to_string(),
        "notes": optional_value(entry.notes.as_deref()),
    })
}

pub fn meal_history_patch(update: &MealHistoryUpdate) -> Value {
    let mut patch = Map::new();
    if let Some(date) = update.date {
        patch.insert("date".to_string(), json!(date.format("%Y-%m-%d").to_string()));
    }
    if let Some(notes) = &update.notes {
        patch.insert("notes".to_string(), optional_value(notes.as_deref()));
    }
    Value::Object(patch)
}

pub fn source_insert(user_id: &str, source: &NewSource) -> Value {
    json!({
        "user_id": user_id,
        "name": source.name.trim(),
        "type": source.source_type.as_str(),
        "url": optional_value(source.url.as_deref()),
    })
}

pub fn source_patch(update: &SourceUpdate) -> Value {
    let mut patch = Map::new();
    if let Some(name) = &update.name {
        patch.insert("name".to_string(), json!(name.trim()));
    }
    if let Some(source_type) = update.source_type {
        patch.insert("type".to_string(), json!(source_type.as_str()));
    }
    if let Some(url) = &update.url {
        patch.insert("url".to_string(), optional_value(url.as_deref()));
    }
    Value::Object(patch)
}

pub fn tag_insert(user_id: &str, tag: &NewTag) -> Value {
    json!({
        "user_id": user_id,
        "name": tag.name.trim(),
        "color": optional_value(tag.color.as_deref()),
    })
}

pub fn dish_tag_insert(user_id: &str, link: &DishTag) -> Value {
    json!({
        "user_id": user_id,
        "dish_id": link.dish_id,
        "tag_id": link.tag_id,
    })
}

pub fn profile_patch(update: &ProfileUpdate, now: DateTime<Utc>) -> Value {
    let mut patch = Map::new();
    if let Some(username) = &update.username {
        patch.insert("username".to_string(), json!(username.trim()));
    }
    if let Some(avatar_url) = &update.avatar_url {
        patch.insert("avatar_url".to_string(), optional_value(avatar_url.as_deref()));
    }
    patch.insert("updated_at".to_string(), json!(now.to_rfc3339()));
    Value::Object(patch)
}
