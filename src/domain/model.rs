use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::error::MealError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dish {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub cuisines: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl Dish {
    pub fn has_cuisine(&self, cuisine: &str) -> bool {
        self.cuisines.iter().any(|c| c.eq_ignore_ascii_case(cuisine))
    }

    pub fn has_tag(&self, tag_id: &str) -> bool {
        self.tags.iter().any(|t| t.id == tag_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealHistory {
    pub id: String,
    pub user_id: String,
    pub dish_id: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Book,
    Website,
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Book => "book",
            SourceType::Website => "website",
            SourceType::Other => "other",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = MealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "book" => Ok(SourceType::Book),
            "website" => Ok(SourceType::Website),
            "other" => Ok(SourceType::Other),
            other => Err(MealError::validation(
                "type",
                format!("unknown source type '{}'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DishTag {
    pub dish_id: String,
    pub tag_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// 附帶烹飪統計的菜色
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DishWithStats {
    #[serde(flatten)]
    pub dish: Dish,
    pub times_cooked: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_made: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_made: Option<NaiveDate>,
}

// 寫入用的 payload

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDish {
    pub name: String,
    pub cuisines: Vec<String>,
    pub source_id: Option<String>,
    pub location: Option<String>,
    pub tag_ids: Vec<String>,
}

/// 部分更新；`Some(None)` 代表清空欄位
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DishUpdate {
    pub name: Option<String>,
    pub cuisines: Option<Vec<String>>,
    pub source_id: Option<Option<String>>,
    pub location: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMealHistory {
    pub dish_id: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MealHistoryUpdate {
    pub date: Option<NaiveDate>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSource {
    pub name: String,
    pub source_type: SourceType,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub source_type: Option<SourceType>,
    pub url: Option<Option<String>>,
}

impl SourceUpdate {
    /// 套用到既有來源上，得到完整的新值以便整體驗證
    pub fn merged_with(&self, existing: &Source) -> NewSource {
        NewSource {
            name: self.name.clone().unwrap_or_else(|| existing.name.clone()),
            source_type: self.source_type.unwrap_or(existing.source_type),
            url: match &self.url {
                Some(url) => url.clone(),
                None => existing.url.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTag {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub avatar_url: Option<Option<String>>,
}
