use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::model::{Item, ItemType};

/// One avatar × costume pairing with price statistics. `avatar_key` is the
/// owning avatar item's id, or a synthesized `avatar:{code}` key when the
/// catalog has no item for that avatar.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CombinationStats {
    pub avatar_key: String,
    pub costume_item_id: u64,
    pub avatar_name: String,
    pub costume_name: String,
    pub count: u64,
    pub total_price: u64,
    pub avg_price: u64,
    pub median_price: u64,
}

#[derive(Default)]
struct Accumulator {
    avatar_name: String,
    costume_name: String,
    count: u64,
    prices: Vec<u64>,
}

/// Join every non-avatar item against the avatar items sharing its target
/// codes. The avatar index makes the join O(items) instead of
/// O(avatars × items). Output ordering is count descending, then key
/// ascending, so repeated runs produce identical reports.
pub fn combine(items: &[Item]) -> Vec<CombinationStats> {
    let mut avatars_by_code: HashMap<&str, Vec<&Item>> = HashMap::new();
    for item in items {
        if item.item_type == ItemType::Avatar {
            for target in &item.targets {
                avatars_by_code.entry(&target.code).or_default().push(item);
            }
        }
    }

    let mut pairs: BTreeMap<(String, u64), Accumulator> = BTreeMap::new();
    for item in items {
        if item.item_type == ItemType::Avatar {
            continue;
        }
        for target in &item.targets {
            match avatars_by_code.get(target.code.as_str()) {
                Some(avatar_items) => {
                    for avatar_item in avatar_items {
                        record(
                            &mut pairs,
                            avatar_item.item_id.to_string(),
                            &avatar_item.name,
                            item,
                        );
                    }
                }
                None => {
                    // Still worth counting; the avatar just was not bought
                    // through this catalog.
                    record(
                        &mut pairs,
                        format!("avatar:{}", target.code),
                        &target.name,
                        item,
                    );
                }
            }
        }
    }

    let mut combinations: Vec<CombinationStats> = pairs
        .into_iter()
        .map(|((avatar_key, costume_item_id), acc)| CombinationStats {
            avatar_key,
            costume_item_id,
            avatar_name: acc.avatar_name,
            costume_name: acc.costume_name,
            count: acc.count,
            total_price: acc.prices.iter().sum(),
            avg_price: mean(&acc.prices),
            median_price: median(&acc.prices),
        })
        .collect();
    combinations.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.avatar_key.cmp(&b.avatar_key))
            .then_with(|| a.costume_item_id.cmp(&b.costume_item_id))
    });
    combinations
}

fn record(
    pairs: &mut BTreeMap<(String, u64), Accumulator>,
    avatar_key: String,
    avatar_name: &str,
    item: &Item,
) {
    let acc = pairs.entry((avatar_key, item.item_id)).or_default();
    acc.avatar_name = avatar_name.to_string();
    acc.costume_name = item.name.clone();
    acc.count += 1;
    if let Some(price) = item.current_price {
        acc.prices.push(price);
    }
}

pub(crate) fn mean(prices: &[u64]) -> u64 {
    if prices.is_empty() {
        return 0;
    }
    let sum: u64 = prices.iter().sum();
    ((sum as f64) / (prices.len() as f64)).round() as u64
}

pub(crate) fn median(prices: &[u64]) -> u64 {
    if prices.is_empty() {
        return 0;
    }
    let mut sorted = prices.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (((sorted[mid - 1] + sorted[mid]) as f64) / 2.0).round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::{combine, median};
    use crate::model::{AvatarRef, Item, ItemType};

    fn item(item_id: u64, item_type: ItemType, name: &str, price: Option<u64>, codes: &[&str]) -> Item {
        Item {
            item_id,
            item_type,
            name: name.to_string(),
            shop_name: None,
            creator_id: None,
            image_url: None,
            url: None,
            current_price: price,
            description_excerpt: None,
            files: Vec::new(),
            targets: codes
                .iter()
                .map(|code| AvatarRef {
                    code: code.to_string(),
                    name: format!("{code}-display"),
                })
                .collect(),
            tags: Vec::new(),
            updated_at: None,
            variants: Vec::new(),
        }
    }

    #[test]
    fn joins_costumes_to_owned_avatar_items() {
        let items = vec![
            item(1_000_001, ItemType::Avatar, "桔梗", None, &["Kikyo"]),
            item(1_000_002, ItemType::Costume, "Dress", Some(2000), &["Kikyo"]),
            item(1_000_003, ItemType::Costume, "Onepiece", Some(1000), &["Kikyo"]),
        ];
        let combos = combine(&items);
        assert_eq!(combos.len(), 2);
        assert!(combos.iter().all(|c| c.avatar_key == "1000001"));
        assert!(combos.iter().all(|c| c.avatar_name == "桔梗"));
        let dress = combos.iter().find(|c| c.costume_item_id == 1_000_002).expect("dress");
        assert_eq!(dress.total_price, 2000);
        assert_eq!(dress.avg_price, 2000);
        assert_eq!(dress.median_price, 2000);
    }

    #[test]
    fn missing_avatar_item_gets_a_placeholder_key() {
        let items = vec![item(
            1_000_010,
            ItemType::Costume,
            "Hoodie",
            Some(1500),
            &["Manuka"],
        )];
        let combos = combine(&items);
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].avatar_key, "avatar:Manuka");
        assert_eq!(combos[0].avatar_name, "Manuka-display");
        assert_eq!(combos[0].costume_name, "Hoodie");
    }

    #[test]
    fn multi_target_costume_produces_one_row_per_avatar() {
        let items = vec![
            item(1_000_020, ItemType::Avatar, "かなえ", None, &["Kanae"]),
            item(
                1_000_021,
                ItemType::Accessory,
                "Ribbon",
                None,
                &["Kanae", "Shinano"],
            ),
        ];
        let combos = combine(&items);
        assert_eq!(combos.len(), 2);
        let keys: Vec<&str> = combos.iter().map(|c| c.avatar_key.as_str()).collect();
        assert!(keys.contains(&"1000020"));
        assert!(keys.contains(&"avatar:Shinano"));
    }

    #[test]
    fn avatar_items_are_never_treated_as_costumes() {
        let items = vec![
            item(1_000_030, ItemType::Avatar, "しなの", None, &["Shinano"]),
            item(1_000_031, ItemType::Avatar, "マヌカ", None, &["Manuka"]),
        ];
        assert!(combine(&items).is_empty());
    }

    #[test]
    fn ordering_is_count_descending_then_key_ascending() {
        let mut items = vec![
            item(1_000_040, ItemType::Costume, "A", None, &["Kikyo"]),
            item(1_000_041, ItemType::Costume, "B", None, &["Hakka", "Kikyo"]),
        ];
        // Same costume listed twice under different ids keeps counts at 1;
        // ordering then falls back to the key.
        items.push(item(1_000_042, ItemType::Costume, "C", None, &["Hakka"]));
        let combos = combine(&items);
        assert_eq!(combos.len(), 4);
        let keys: Vec<String> = combos
            .iter()
            .map(|c| format!("{}/{}", c.avatar_key, c.costume_item_id))
            .collect();
        assert_eq!(
            keys,
            vec![
                "avatar:Hakka/1000041",
                "avatar:Hakka/1000042",
                "avatar:Kikyo/1000040",
                "avatar:Kikyo/1000041",
            ]
        );
    }

    #[test]
    fn unpriced_items_count_but_contribute_no_prices() {
        let items = vec![item(1_000_050, ItemType::Costume, "Cap", None, &["Moe"])];
        let combos = combine(&items);
        assert_eq!(combos[0].count, 1);
        assert_eq!(combos[0].total_price, 0);
        assert_eq!(combos[0].avg_price, 0);
        assert_eq!(combos[0].median_price, 0);
    }

    #[test]
    fn even_length_median_rounds_the_middle_mean() {
        assert_eq!(median(&[1000, 2000]), 1500);
        assert_eq!(median(&[100, 201]), 151);
        assert_eq!(median(&[5]), 5);
        assert_eq!(median(&[]), 0);
    }
}
