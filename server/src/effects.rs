//! Timed effects and skill cooldowns.
//!
//! Both stores keep one mutex per owning entity, so applying a buff to one
//! target never waits on the expiry sweep of another.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::debug;
use realm_shared::{EffectKind, EffectTemplate, EntityId, SkillId, Stat};

use crate::utils::{lock, read, write};

/// Per-owner collections, created lazily on first write.
struct OwnerMap<T> {
    owners: RwLock<HashMap<EntityId, Arc<Mutex<T>>>>,
}

impl<T: Default> OwnerMap<T> {
    fn new() -> Self {
        Self {
            owners: RwLock::new(HashMap::new()),
        }
    }

    fn existing(&self, owner: EntityId) -> Option<Arc<Mutex<T>>> {
        read(&self.owners).get(&owner).cloned()
    }

    fn get_or_create(&self, owner: EntityId) -> Arc<Mutex<T>> {
        if let Some(entry) = self.existing(owner) {
            return entry;
        }
        Arc::clone(write(&self.owners).entry(owner).or_default())
    }

    fn all(&self) -> Vec<(EntityId, Arc<Mutex<T>>)> {
        read(&self.owners)
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect()
    }

    fn remove(&self, owner: EntityId) {
        write(&self.owners).remove(&owner);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEffect {
    pub id: u64,
    pub source_id: EntityId,
    pub target_id: EntityId,
    pub kind: EffectKind,
    pub stat: Stat,
    pub value: f32,
    pub started_at: u64,
    pub duration_ms: u64,
}

impl ActiveEffect {
    pub fn expires_at(&self) -> u64 {
        self.started_at.saturating_add(self.duration_ms)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at() <= now
    }
}

pub struct EffectStore {
    effects: OwnerMap<Vec<ActiveEffect>>,
    next_effect_id: AtomicU64,
}

impl Default for EffectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EffectStore {
    pub fn new() -> Self {
        Self {
            effects: OwnerMap::new(),
            next_effect_id: AtomicU64::new(1),
        }
    }

    /// Instantiates `template` on `target_id` starting at `now`.
    pub fn apply(
        &self,
        target_id: EntityId,
        source_id: EntityId,
        template: &EffectTemplate,
        now: u64,
    ) -> ActiveEffect {
        let effect = ActiveEffect {
            id: self.next_effect_id.fetch_add(1, Ordering::Relaxed),
            source_id,
            target_id,
            kind: template.kind,
            stat: template.stat,
            value: template.signed_value(),
            started_at: now,
            duration_ms: template.duration_ms(),
        };

        let entry = self.effects.get_or_create(target_id);
        lock(&entry).push(effect.clone());
        debug!(
            "Effect {} ({:?} {:+.1}) applied to {} by {} for {} ms",
            effect.id, effect.stat, effect.value, target_id, source_id, effect.duration_ms
        );
        effect
    }

    /// Live effects on `target_id`. Expired entries are purged before reading.
    pub fn active_effects(&self, target_id: EntityId, now: u64) -> Vec<ActiveEffect> {
        let Some(entry) = self.effects.existing(target_id) else {
            return Vec::new();
        };
        let mut effects = lock(&entry);
        effects.retain(|effect| !effect.is_expired(now));
        effects.clone()
    }

    /// Sum of live effect values on one stat.
    pub fn stat_bonus(&self, target_id: EntityId, stat: Stat, now: u64) -> f32 {
        self.active_effects(target_id, now)
            .iter()
            .filter(|effect| effect.stat == stat)
            .map(|effect| effect.value)
            .sum()
    }

    /// Removes every effect whose end time has passed and returns them.
    /// Running it twice for the same `now` removes nothing the second time.
    pub fn expire(&self, now: u64) -> Vec<ActiveEffect> {
        let mut expired = Vec::new();
        for (_, entry) in self.effects.all() {
            let mut effects = lock(&entry);
            let (gone, live): (Vec<ActiveEffect>, Vec<ActiveEffect>) = effects
                .drain(..)
                .partition(|effect| effect.is_expired(now));
            *effects = live;
            expired.extend(gone);
        }
        expired
    }

    pub fn clear(&self, target_id: EntityId) {
        self.effects.remove(target_id);
    }
}

/// Last-use timestamps keyed by (entity, skill).
pub struct CooldownStore {
    cooldowns: OwnerMap<HashMap<SkillId, u64>>,
}

impl Default for CooldownStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CooldownStore {
    pub fn new() -> Self {
        Self {
            cooldowns: OwnerMap::new(),
        }
    }

    pub fn last_used(&self, entity_id: EntityId, skill_id: SkillId) -> Option<u64> {
        self.cooldowns
            .existing(entity_id)
            .and_then(|entry| lock(&entry).get(&skill_id).copied())
    }

    /// Milliseconds until the skill may be used again; zero when ready.
    pub fn remaining(
        &self,
        entity_id: EntityId,
        skill_id: SkillId,
        cooldown_ms: u64,
        now: u64,
    ) -> u64 {
        match self.last_used(entity_id, skill_id) {
            Some(last_used) => cooldown_ms.saturating_sub(now.saturating_sub(last_used)),
            None => 0,
        }
    }

    pub fn stamp(&self, entity_id: EntityId, skill_id: SkillId, now: u64) {
        let entry = self.cooldowns.get_or_create(entity_id);
        lock(&entry).insert(skill_id, now);
    }

    pub fn clear(&self, entity_id: EntityId) {
        self.cooldowns.remove(entity_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashSet;
    use std::thread;

    fn buff(stat: Stat, value: f32, duration_secs: f32) -> EffectTemplate {
        EffectTemplate {
            kind: EffectKind::Buff,
            stat,
            value,
            duration_secs,
            chance: 1.0,
        }
    }

    #[test]
    fn test_buff_expires_exactly_once() {
        let store = EffectStore::new();
        store.apply(1, 1, &buff(Stat::Defense, 10.0, 2.0), 1_000);

        assert_eq!(store.active_effects(1, 2_999).len(), 1);

        let expired = store.expire(3_000);
        assert_eq!(expired.len(), 1);
        assert!(store.active_effects(1, 3_000).is_empty());

        let again = store.expire(3_000);
        assert!(again.is_empty());
        let later = store.expire(10_000);
        assert!(later.is_empty());
    }

    #[test]
    fn test_read_purges_expired() {
        let store = EffectStore::new();
        store.apply(4, 2, &buff(Stat::AttackPower, 5.0, 1.0), 0);
        store.apply(4, 2, &buff(Stat::AttackPower, 7.0, 5.0), 0);

        assert_approx_eq!(store.stat_bonus(4, Stat::AttackPower, 500), 12.0, 0.0001);
        assert_approx_eq!(store.stat_bonus(4, Stat::AttackPower, 1_000), 7.0, 0.0001);
        assert_approx_eq!(store.stat_bonus(4, Stat::Defense, 1_000), 0.0, 0.0001);
        assert!(store.expire(1_000).is_empty());
    }

    #[test]
    fn test_debuff_lowers_stat() {
        let store = EffectStore::new();
        let template = EffectTemplate {
            kind: EffectKind::Debuff,
            stat: Stat::Defense,
            value: 8.0,
            duration_secs: 3.0,
            chance: 1.0,
        };
        store.apply(9, 1, &template, 0);
        assert_approx_eq!(store.stat_bonus(9, Stat::Defense, 100), -8.0, 0.0001);
    }

    #[test]
    fn test_effect_ids_unique_under_contention() {
        let store = Arc::new(EffectStore::new());
        let handles: Vec<_> = (0..8)
            .map(|thread_index| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..50)
                        .map(|_| store.apply(thread_index % 3, 0, &buff(Stat::Defense, 1.0, 60.0), 0).id)
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id), "duplicate effect id {}", id);
            }
        }
        assert_eq!(ids.len(), 400);
        let total: usize = (0..3).map(|target| store.active_effects(target, 1).len()).sum();
        assert_eq!(total, 400);
    }

    #[test]
    fn test_cooldown_boundary() {
        let cooldowns = CooldownStore::new();
        assert_eq!(cooldowns.remaining(1, 7, 3_000, 0), 0);

        cooldowns.stamp(1, 7, 10_000);
        assert_eq!(cooldowns.last_used(1, 7), Some(10_000));
        assert_eq!(cooldowns.remaining(1, 7, 3_000, 10_000), 3_000);
        assert_eq!(cooldowns.remaining(1, 7, 3_000, 12_999), 1);
        assert_eq!(cooldowns.remaining(1, 7, 3_000, 13_000), 0);
        assert_eq!(cooldowns.remaining(2, 7, 3_000, 10_000), 0);
    }

    #[test]
    fn test_clear_drops_owner() {
        let cooldowns = CooldownStore::new();
        let effects = EffectStore::new();
        cooldowns.stamp(3, 1, 100);
        effects.apply(3, 3, &buff(Stat::Dexterity, 2.0, 10.0), 100);

        cooldowns.clear(3);
        effects.clear(3);

        assert_eq!(cooldowns.last_used(3, 1), None);
        assert!(effects.active_effects(3, 100).is_empty());
    }
}
