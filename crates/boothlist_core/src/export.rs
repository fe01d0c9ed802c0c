use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::aggregate::{self, CombinationStats};
use crate::model::{Item, ItemType};

/// The rendering side reads these files by key; every name here is part of
/// that contract.
#[derive(Serialize)]
struct CatalogDocument<'a> {
    items: &'a [Item],
}

pub fn write_catalog(items: &[Item], output_path: &Path) -> Result<()> {
    let document = CatalogDocument { items };
    write_yaml(&document, output_path)?;
    tracing::info!(count = items.len(), path = %output_path.display(), "exported catalog");
    Ok(())
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PriceStats {
    pub total_value: u64,
    pub average_price: u64,
    pub median_price: u64,
    pub min_price: u64,
    pub max_price: u64,
    pub priced_items: usize,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub items_total: usize,
    pub variants_total: usize,
    pub shops_total: usize,
    pub avatars_supported: usize,
    pub price_stats: PriceStats,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub item_type: &'static str,
    pub count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ShopCount {
    pub shop_name: String,
    pub count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AvatarCount {
    pub avatar_code: String,
    pub count: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Rankings {
    pub avatar_costume_combinations: Vec<CombinationStats>,
    pub popular_shops: Vec<ShopCount>,
    pub popular_avatars: Vec<AvatarCount>,
    pub type_distribution: Vec<TypeCount>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Metrics {
    pub summary: Summary,
    pub rankings: Rankings,
}

/// Counters over the finished catalog. Every ranking is ordered count
/// descending with a name tie-break so output files diff cleanly between
/// runs. Free items are excluded from price statistics, not coerced to 0.
pub fn build_metrics(items: &[Item]) -> Metrics {
    let variants_total = items.iter().map(|item| item.variants.len()).sum();

    let mut type_counts: HashMap<ItemType, u64> = HashMap::new();
    let mut shop_counts: HashMap<&str, u64> = HashMap::new();
    let mut avatar_counts: HashMap<&str, u64> = HashMap::new();
    for item in items {
        *type_counts.entry(item.item_type).or_default() += 1;
        if let Some(shop) = item.shop_name.as_deref() {
            *shop_counts.entry(shop).or_default() += 1;
        }
        for target in &item.targets {
            *avatar_counts.entry(&target.code).or_default() += 1;
        }
        for variant in &item.variants {
            for target in &variant.targets {
                *avatar_counts.entry(&target.code).or_default() += 1;
            }
        }
    }

    let prices: Vec<u64> = items
        .iter()
        .filter_map(|item| item.current_price)
        .filter(|price| *price > 0)
        .collect();
    let price_stats = PriceStats {
        total_value: prices.iter().sum(),
        average_price: aggregate::mean(&prices),
        median_price: aggregate::median(&prices),
        min_price: prices.iter().copied().min().unwrap_or(0),
        max_price: prices.iter().copied().max().unwrap_or(0),
        priced_items: prices.len(),
    };

    let mut type_distribution: Vec<TypeCount> = type_counts
        .into_iter()
        .map(|(item_type, count)| TypeCount {
            item_type: item_type.as_str(),
            count,
        })
        .collect();
    type_distribution.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.item_type.cmp(b.item_type)));

    let shops_total = shop_counts.len();
    let mut popular_shops: Vec<ShopCount> = shop_counts
        .into_iter()
        .map(|(shop_name, count)| ShopCount {
            shop_name: shop_name.to_string(),
            count,
        })
        .collect();
    popular_shops.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.shop_name.cmp(&b.shop_name)));
    popular_shops.truncate(10);

    let mut popular_avatars: Vec<AvatarCount> = avatar_counts
        .into_iter()
        .map(|(avatar_code, count)| AvatarCount {
            avatar_code: avatar_code.to_string(),
            count,
        })
        .collect();
    popular_avatars
        .sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.avatar_code.cmp(&b.avatar_code)));

    let mut combinations = aggregate::combine(items);
    combinations.truncate(20);

    Metrics {
        summary: Summary {
            items_total: items.len(),
            variants_total,
            shops_total,
            avatars_supported: popular_avatars.len(),
            price_stats,
        },
        rankings: Rankings {
            avatar_costume_combinations: combinations,
            popular_shops,
            popular_avatars,
            type_distribution,
        },
    }
}

pub fn write_metrics(metrics: &Metrics, output_path: &Path) -> Result<()> {
    write_yaml(metrics, output_path)?;
    tracing::info!(path = %output_path.display(), "exported metrics");
    Ok(())
}

fn write_yaml<T: Serialize>(value: &T, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let text = serde_yaml::to_string(value).context("serializing yaml")?;
    std::fs::write(output_path, text)
        .with_context(|| format!("writing {}", output_path.display()))?;
    Ok(())
}
