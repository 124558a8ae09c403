use crate::domain::model::{
    DishUpdate, MealHistoryUpdate, NewDish, NewMealHistory, NewSource, NewTag, ProfileUpdate,
    SourceType, SourceUpdate,
};
use crate::utils::error::{MealError, Result};
use chrono::{Local, NaiveDate};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

pub const MAX_DISH_NAME_LENGTH: usize = 100;
pub const MAX_CUISINE_LENGTH: usize = 50;
pub const MAX_LOCATION_LENGTH: usize = 200;
pub const MAX_NOTES_LENGTH: usize = 1000;
pub const MAX_SOURCE_NAME_LENGTH: usize = 200;
pub const MAX_TAG_NAME_LENGTH: usize = 30;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static TAG_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{N} _-]+$").unwrap());
static COLOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").unwrap());
static USERNAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{3,30}$").unwrap());

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn check_http_url(url_str: &str) -> std::result::Result<(), String> {
    match Url::parse(url_str) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(()),
            scheme => Err(format!("Unsupported URL scheme: {}", scheme)),
        },
        Err(e) => Err(format!("Invalid URL format: {}", e)),
    }
}

// ---- 配置驗證 ----

pub fn validate_url(field_name: &str, url_str: &str) -> Result<()> {
    if url_str.is_empty() {
        return Err(MealError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: url_str.to_string(),
            reason: "URL cannot be empty".to_string(),
        });
    }

    check_http_url(url_str).map_err(|reason| MealError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: url_str.to_string(),
        reason,
    })
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(MealError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if path.contains('\0') {
        return Err(MealError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: path.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: usize, min_value: usize) -> Result<()> {
    if value < min_value {
        return Err(MealError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| MealError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MealError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(MealError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

// ---- 資料驗證 ----

pub fn validate_required_text(field_name: &str, value: &str, max_length: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MealError::validation(field_name, "is required"));
    }
    validate_max_length(field_name, value, max_length)
}

pub fn validate_max_length(field_name: &str, value: &str, max_length: usize) -> Result<()> {
    let length = value.trim().chars().count();
    if length > max_length {
        return Err(MealError::validation(
            field_name,
            format!("must be at most {} characters (got {})", max_length, length),
        ));
    }
    Ok(())
}

pub fn validate_optional_text(field_name: &str, value: Option<&str>, max_length: usize) -> Result<()> {
    match value {
        Some(text) => validate_max_length(field_name, text, max_length),
        None => Ok(()),
    }
}

pub fn validate_link(field_name: &str, url_str: &str) -> Result<()> {
    check_http_url(url_str.trim()).map_err(|reason| MealError::validation(field_name, reason))
}

pub fn validate_cuisines(field_name: &str, cuisines: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for cuisine in cuisines {
        validate_required_text(field_name, cuisine, MAX_CUISINE_LENGTH)?;
        if !seen.insert(cuisine.trim().to_lowercase()) {
            return Err(MealError::validation(
                field_name,
                format!("duplicate cuisine '{}'", cuisine.trim()),
            ));
        }
    }
    Ok(())
}

/// 解析 `YYYY-MM-DD` 日期字串
pub fn parse_date(field_name: &str, value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    if !DATE_RE.is_match(value) {
        return Err(MealError::validation(
            field_name,
            format!("'{}' is not a YYYY-MM-DD date", value),
        ));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| MealError::validation(field_name, format!("'{}' is not a valid date: {}", value, e)))
}

pub fn validate_meal_date(field_name: &str, date: NaiveDate, today: NaiveDate) -> Result<()> {
    let earliest = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN);
    if date < earliest {
        return Err(MealError::validation(field_name, "must not be before 1900-01-01"));
    }
    if date > today {
        return Err(MealError::validation(field_name, "cannot be in the future"));
    }
    Ok(())
}

pub fn validate_tag_name(field_name: &str, name: &str) -> Result<()> {
    validate_required_text(field_name, name, MAX_TAG_NAME_LENGTH)?;
    if !TAG_NAME_RE.is_match(name.trim()) {
        return Err(MealError::validation(
            field_name,
            "may only contain letters, digits, spaces, '-' and '_'",
        ));
    }
    Ok(())
}

pub fn validate_color(field_name: &str, color: &str) -> Result<()> {
    if !COLOR_RE.is_match(color.trim()) {
        return Err(MealError::validation(field_name, "must be a #RRGGBB color"));
    }
    Ok(())
}

pub fn validate_username(field_name: &str, username: &str) -> Result<()> {
    if !USERNAME_RE.is_match(username.trim()) {
        return Err(MealError::validation(
            field_name,
            "must be 3-30 characters of letters, digits or '_'",
        ));
    }
    Ok(())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

impl Validate for NewDish {
    fn validate(&self) -> Result<()> {
        validate_required_text("name", &self.name, MAX_DISH_NAME_LENGTH)?;
        validate_cuisines("cuisines", &self.cuisines)?;
        validate_optional_text("location", self.location.as_deref(), MAX_LOCATION_LENGTH)?;
        Ok(())
    }
}

impl Validate for DishUpdate {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_required_text("name", name, MAX_DISH_NAME_LENGTH)?;
        }
        if let Some(cuisines) = &self.cuisines {
            validate_cuisines("cuisines", cuisines)?;
        }
        if let Some(location) = &self.location {
            validate_optional_text("location", location.as_deref(), MAX_LOCATION_LENGTH)?;
        }
        Ok(())
    }
}

impl NewMealHistory {
    pub fn validate_on(&self, today: NaiveDate) -> Result<()> {
        validate_required_text("dishId", &self.dish_id, usize::MAX)?;
        validate_meal_date("date", self.date, today)?;
        validate_optional_text("notes", self.notes.as_deref(), MAX_NOTES_LENGTH)?;
        Ok(())
    }
}

impl Validate for NewMealHistory {
    fn validate(&self) -> Result<()> {
        self.validate_on(today())
    }
}

impl MealHistoryUpdate {
    pub fn validate_on(&self, today: NaiveDate) -> Result<()> {
        if let Some(date) = self.date {
            validate_meal_date("date", date, today)?;
        }
        if let Some(notes) = &self.notes {
            validate_optional_text("notes", notes.as_deref(), MAX_NOTES_LENGTH)?;
        }
        Ok(())
    }
}

impl Validate for MealHistoryUpdate {
    fn validate(&self) -> Result<()> {
        self.validate_on(today())
    }
}

impl Validate for NewSource {
    fn validate(&self) -> Result<()> {
        validate_required_text("name", &self.name, MAX_SOURCE_NAME_LENGTH)?;

        let url = self.url.as_deref().map(str::trim).filter(|u| !u.is_empty());
        match (self.source_type, url) {
            (SourceType::Website, None) => {
                Err(MealError::validation("url", "is required for website sources"))
            }
            (_, Some(url)) => validate_link("url", url),
            (_, None) => Ok(()),
        }
    }
}

impl Validate for SourceUpdate {
    fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_required_text("name", name, MAX_SOURCE_NAME_LENGTH)?;
        }
        if let Some(Some(url)) = &self.url {
            if !url.trim().is_empty() {
                validate_link("url", url)?;
            }
        }
        Ok(())
    }
}

impl Validate for NewTag {
    fn validate(&self) -> Result<()> {
        validate_tag_name("name", &self.name)?;
        if let Some(color) = self.color.as_deref().filter(|c| !c.trim().is_empty()) {
            validate_color("color", color)?;
        }
        Ok(())
    }
}

impl Validate for ProfileUpdate {
    fn validate(&self) -> Result<()> {
        if let Some(username) = &self.username {
            validate_username("username", username)?;
        }
        if let Some(Some(avatar_url)) = &self.avatar_url {
            if !avatar_url.trim().is_empty() {
                validate_link("avatarUrl", avatar_url)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("backend.url", "https://example.com").is_ok());
        assert!(validate_url("backend.url", "http://example.com").is_ok());
        assert!(validate_url("backend.url", "").is_err());
        assert!(validate_url("backend.url", "invalid-url").is_err());
        assert!(validate_url("backend.url", "ftp://example.com").is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("transfer.page_size", 5, 1).is_ok());
        assert!(validate_positive_number("transfer.page_size", 0, 1).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("date", "2024-03-09").unwrap(), date(2024, 3, 9));
        assert_eq!(parse_date("date", " 2024-03-09 ").unwrap(), date(2024, 3, 9));
        assert!(parse_date("date", "2024-3-9").is_err());
        assert!(parse_date("date", "2024-02-30").is_err());
        assert!(parse_date("date", "09/03/2024").is_err());
    }

    #[test]
    fn test_meal_date_bounds() {
        let today = date(2024, 6, 1);
        assert!(validate_meal_date("date", today, today).is_ok());
        assert!(validate_meal_date("date", date(2024, 6, 2), today).is_err());
        assert!(validate_meal_date("date", date(1899, 12, 31), today).is_err());
    }

    #[test]
    fn test_new_dish_rules() {
        let mut dish = NewDish {
            name: "Shakshuka".to_string(),
            cuisines: vec!["Middle Eastern".to_string()],
            ..Default::default()
        };
        assert!(dish.validate().is_ok());

        dish.cuisines.push("middle eastern".to_string());
        assert!(dish.validate().is_err());

        dish.cuisines = vec![];
        dish.name = "   ".to_string();
        assert!(dish.validate().is_err());

        dish.name = "x".repeat(MAX_DISH_NAME_LENGTH + 1);
        assert!(dish.validate().is_err());
    }

    #[test]
    fn test_meal_history_rules() {
        let today = date(2024, 6, 1);
        let entry = NewMealHistory {
            dish_id: "d1".to_string(),
            date: date(2024, 5, 30),
            notes: Some("a bit too salty".to_string()),
        };
        assert!(entry.validate_on(today).is_ok());

        let missing_dish = NewMealHistory {
            dish_id: "".to_string(),
            ..entry.clone()
        };
        assert!(missing_dish.validate_on(today).is_err());

        let long_notes = NewMealHistory {
            notes: Some("n".repeat(MAX_NOTES_LENGTH + 1)),
            ..entry
        };
        assert!(long_notes.validate_on(today).is_err());
    }

    #[test]
    fn test_source_rules() {
        let website = NewSource {
            name: "Serious Eats".to_string(),
            source_type: SourceType::Website,
            url: None,
        };
        assert!(website.validate().is_err());

        let website = NewSource {
            url: Some("https://www.seriouseats.com".to_string()),
            ..website
        };
        assert!(website.validate().is_ok());

        let book = NewSource {
            name: "Jerusalem".to_string(),
            source_type: SourceType::Book,
            url: Some("not a url".to_string()),
        };
        assert!(book.validate().is_err());
    }

    #[test]
    fn test_tag_and_profile_rules() {
        assert!(NewTag {
            name: "weeknight".to_string(),
            color: Some("#ff8800".to_string())
        }
        .validate()
        .is_ok());
        assert!(NewTag {
            name: "spicy!".to_string(),
            color: None
        }
        .validate()
        .is_err());
        assert!(NewTag {
            name: "veggie".to_string(),
            color: Some("orange".to_string())
        }
        .validate()
        .is_err());

        assert!(ProfileUpdate {
            username: Some("home_cook".to_string()),
            avatar_url: None
        }
        .validate()
        .is_ok());
        assert!(ProfileUpdate {
            username: Some("ab".to_string()),
            avatar_url: None
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_blank_optional_values_are_allowed() {
        assert!(NewTag {
            name: "weeknight".to_string(),
            color: Some("  ".to_string())
        }
        .validate()
        .is_ok());
        assert!(ProfileUpdate {
            username: None,
            avatar_url: Some(Some("".to_string()))
        }
        .validate()
        .is_ok());
        assert!(ProfileUpdate {
            username: None,
            avatar_url: Some(Some("avatar.png".to_string()))
        }
        .validate()
        .is_err());
    }
}
