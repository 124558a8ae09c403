use crate::domain::model::{Dish, DishWithStats, MealHistory};
use crate::utils::error::{MealError, Result};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DishCount {
    pub dish_id: String,
    pub name: String,
    pub times_cooked: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealStats {
    pub total_dishes: usize,
    pub total_meals: usize,
    pub never_cooked: usize,
    pub meals_last_30_days: usize,
    pub distinct_cuisines: usize,
    pub meals_by_cuisine: BTreeMap<String, usize>,
    pub meals_by_month: BTreeMap<String, usize>,
    pub most_cooked: Vec<DishCount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_meal_date: Option<NaiveDate>,
}

/// 依烹飪紀錄為每道菜計算次數與首末日期，找不到菜色的紀錄會被忽略
pub fn dish_stats(dishes: &[Dish], history: &[MealHistory]) -> Vec<DishWithStats> {
    let mut per_dish: HashMap<&str, (usize, NaiveDate, NaiveDate)> = HashMap::new();
    for entry in history {
        per_dish
            .entry(entry.dish_id.as_str())
            .and_modify(|(count, first, last)| {
                *count += 1;
                *first = (*first).min(entry.date);
                *last = (*last).max(entry.date);
            })
            .or_insert((1, entry.date, entry.date));
    }

    dishes
        .iter()
        .map(|dish| {
            let (times_cooked, first_made, last_made) = match per_dish.get(dish.id.as_str()) {
                Some((count, first, last)) => (*count, Some(*first), Some(*last)),
                None => (0, None, None),
            };
            DishWithStats {
                dish: dish.clone(),
                times_cooked,
                first_made,
                last_made,
            }
        })
        .collect()
}

pub fn compute_stats(
    dishes: &[Dish],
    history: &[MealHistory],
    today: NaiveDate,
    top_n: usize,
) -> MealStats {
    let by_id: HashMap<&str, &Dish> = dishes.iter().map(|d| (d.id.as_str(), d)).collect();
    let known: Vec<&MealHistory> = history
        .iter()
        .filter(|h| by_id.contains_key(h.dish_id.as_str()))
        .collect();

    let window_start = today - Duration::days(30);

    // 同一菜系不同大小寫時沿用第一次出現的寫法
    let mut cuisine_names: HashMap<String, String> = HashMap::new();
    for dish in dishes {
        for cuisine in &dish.cuisines {
            let cuisine = cuisine.trim();
            cuisine_names
                .entry(cuisine.to_lowercase())
                .or_insert_with(|| cuisine.to_string());
        }
    }

    let mut meals_by_cuisine = BTreeMap::new();
    let mut meals_by_month = BTreeMap::new();
    let mut meals_last_30_days = 0;

    for entry in &known {
        *meals_by_month
            .entry(entry.date.format("%Y-%m").to_string())
            .or_insert(0) += 1;

        if entry.date > window_start && entry.date <= today {
            meals_last_30_days += 1;
        }

        if let Some(dish) = by_id.get(entry.dish_id.as_str()) {
            for cuisine in &dish.cuisines {
                if let Some(name) = cuisine_names.get(&cuisine.trim().to_lowercase()) {
                    *meals_by_cuisine.entry(name.clone()).or_insert(0) += 1;
                }
            }
        }
    }

    let per_dish = dish_stats(dishes, history);
    let never_cooked = per_dish.iter().filter(|d| d.times_cooked == 0).count();

    let mut most_cooked: Vec<DishCount> = per_dish
        .iter()
        .filter(|d| d.times_cooked > 0)
        .map(|d| DishCount {
            dish_id: d.dish.id.clone(),
            name: d.dish.name.clone(),
            times_cooked: d.times_cooked,
        })
        .collect();
    most_cooked.sort_by(|a, b| {
        b.times_cooked
            .cmp(&a.times_cooked)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    most_cooked.truncate(top_n);

    MealStats {
        total_dishes: dishes.len(),
        total_meals: known.len(),
        never_cooked,
        meals_last_30_days,
        distinct_cuisines: cuisine_names.len(),
        meals_by_cuisine,
        meals_by_month,
        most_cooked,
        last_meal_date: known.iter().map(|h| h.date).max(),
    }
}

/// 超過 `days` 天沒煮過的菜（從未煮過的排最前面，其餘由舊到新）
///
/// `days` 超出日期範圍時沒有任何紀錄早於截止日，只剩從未煮過的菜
pub fn stale_dishes(
    stats: &[DishWithStats],
    today: NaiveDate,
    days: i64,
) -> Result<Vec<&DishWithStats>> {
    if days < 0 {
        return Err(MealError::validation("days", "must not be negative"));
    }
    let cutoff = Duration::try_days(days).and_then(|span| today.checked_sub_signed(span));

    let mut stale: Vec<&DishWithStats> = stats
        .iter()
        .filter(|d| match (d.last_made, cutoff) {
            (None, _) => true,
            (Some(last), Some(cutoff)) => last < cutoff,
            (Some(_), None) => false,
        })
        .collect();
    stale.sort_by(|a, b| {
        a.last_made
            .cmp(&b.last_made)
            .then_with(|| a.dish.name.cmp(&b.dish.name))
    });
    Ok(stale)
}
