use std::sync::Arc;

use log::debug;
use rand::{Rng, RngCore};
use realm_shared::{LootItem, MonsterTemplate};

use crate::entity::Player;
use crate::templates::TemplateStore;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LootDrop {
    pub gold: u64,
    pub items: Vec<LootItem>,
}

impl LootDrop {
    pub fn is_empty(&self) -> bool {
        self.gold == 0 && self.items.is_empty()
    }
}

/// Decides and credits what a kill yields.
pub trait LootService: Send + Sync {
    fn generate_loot(&self, monster: &MonsterTemplate, rng: &mut dyn RngCore) -> LootDrop;

    fn apply_loot(&self, player: &mut Player, drop: &LootDrop);
}

/// Rolls gold in the template range and every drop entry by its chance.
pub struct TableLoot {
    templates: Arc<dyn TemplateStore>,
}

impl TableLoot {
    pub fn new(templates: Arc<dyn TemplateStore>) -> Self {
        Self { templates }
    }
}

impl LootService for TableLoot {
    fn generate_loot(&self, monster: &MonsterTemplate, rng: &mut dyn RngCore) -> LootDrop {
        let gold: u32 = if monster.gold_max > monster.gold_min {
            rng.gen_range(monster.gold_min..=monster.gold_max)
        } else {
            monster.gold_min
        };
        let gold = u64::from(gold);

        let items = monster
            .drops
            .iter()
            .filter(|entry| rng.gen::<f32>() < entry.chance)
            .map(|entry| LootItem {
                item_id: entry.item_id,
                name: self
                    .templates
                    .item(entry.item_id)
                    .map(|item| item.name.clone())
                    .unwrap_or_else(|| format!("item #{}", entry.item_id)),
                quantity: entry.quantity.max(1),
            })
            .collect();

        LootDrop { gold, items }
    }

    fn apply_loot(&self, player: &mut Player, drop: &LootDrop) {
        if drop.is_empty() {
            return;
        }

        player.gold = player.gold.saturating_add(drop.gold);
        for item in &drop.items {
            match player
                .inventory
                .iter_mut()
                .find(|held| held.item_id == item.item_id)
            {
                Some(held) => held.quantity = held.quantity.saturating_add(item.quantity),
                None => player.inventory.push(item.clone()),
            }
        }
        player.dirty = true;
        debug!(
            "Player {} looted {} gold and {} item stacks",
            player.id,
            drop.gold,
            drop.items.len()
        );
    }
}
