use std::collections::BTreeMap;
use std::f32::consts::TAU;

use glam::{Affine2, Vec2};

use replica::math::{self, Quad};
use replica::replication::{
    DamageState, DirectionFlags, LevelMetadata, SpawnEvent, SpriteState,
};
use replica::{DamageStore, EntityId, EntityStore, SpriteStore, UpdateContext};

const ARENA_RADIUS: f32 = 40.0;
const PROJECTILE_INTERVAL_MS: u32 = 2000;
const PROJECTILE_LIFETIME_MS: u32 = 1500;
const PROJECTILE_SPEED: f32 = 30.0;
const HIT_INTERVAL_MS: u32 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Walker,
    Shield,
    Projectile,
}

#[derive(Debug, Clone)]
pub struct DemoEntity {
    pub kind: EntityKind,
    /// Local to `parent` when one is set.
    pub position: Vec2,
    pub rotation: f32,
    pub parent: Option<EntityId>,
    pub velocity: Vec2,
    pub sprite: SpriteState,
    pub damage: Option<DamageState>,
    pub age_ms: u32,
}

impl DemoEntity {
    fn new(kind: EntityKind, position: Vec2, sprite_hash: u32) -> Self {
        Self {
            kind,
            position,
            rotation: 0.0,
            parent: None,
            velocity: Vec2::ZERO,
            sprite: SpriteState {
                sprite_hash,
                hex_color: 0xFFFF_FFFF,
                shadow_offset: Vec2::new(0.0, -0.25),
                shadow_size: 0.5,
                ..Default::default()
            },
            damage: None,
            age_ms: 0,
        }
    }
}

/// Small authoritative world: walkers circling the arena, each carrying a
/// shield child, and projectiles fired on a timer.
pub struct DemoWorld {
    entities: BTreeMap<EntityId, DemoEntity>,
    free_ids: Vec<EntityId>,
    next_id: EntityId,
    capacity: u32,
    spawns: Vec<SpawnEvent>,
    projectile_timer_ms: u32,
    hit_timer_ms: u32,
    metadata: LevelMetadata,
}

impl DemoWorld {
    pub fn new(capacity: u32) -> Self {
        Self {
            entities: BTreeMap::new(),
            free_ids: Vec::new(),
            next_id: 0,
            capacity,
            spawns: Vec::new(),
            projectile_timer_ms: 0,
            hit_timer_ms: 0,
            metadata: LevelMetadata {
                camera_position: Vec2::ZERO,
                camera_size: Vec2::new(64.0, 36.0),
                background_texture_hash: 0x0BAD_F00D,
                world_file_hash: 0x5EED_0001,
            },
        }
    }

    pub fn populate(&mut self, walkers: u32) {
        for i in 0..walkers {
            let angle = TAU * i as f32 / walkers.max(1) as f32;
            let mut walker = DemoEntity::new(
                EntityKind::Walker,
                Vec2::from_angle(angle) * ARENA_RADIUS * 0.5,
                0x1000 + i,
            );
            walker.damage = Some(DamageState {
                health: 100,
                full_health: 100,
                last_damage: 0,
                is_boss: i == 0,
            });
            let Some(walker_id) = self.spawn(walker, 0) else {
                log::warn!("world full after {} walkers", i);
                return;
            };

            let mut shield = DemoEntity::new(EntityKind::Shield, Vec2::new(1.0, 0.0), 0x2000);
            shield.parent = Some(walker_id);
            self.spawn(shield, 0);
        }
    }

    pub fn spawn(&mut self, entity: DemoEntity, timestamp: u32) -> Option<EntityId> {
        let id = match self.free_ids.pop() {
            Some(id) => id,
            None if self.next_id < self.capacity => {
                self.next_id += 1;
                self.next_id - 1
            }
            None => return None,
        };

        self.entities.insert(id, entity);
        self.spawns.push(SpawnEvent {
            entity: id,
            spawn: true,
            timestamp,
        });
        Some(id)
    }

    pub fn despawn(&mut self, id: EntityId, timestamp: u32) -> bool {
        if self.entities.remove(&id).is_none() {
            return false;
        }
        self.free_ids.push(id);
        self.spawns.push(SpawnEvent {
            entity: id,
            spawn: false,
            timestamp,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Advances the world one tick. Spawn events from the previous tick are
    /// discarded first.
    pub fn step(&mut self, ctx: &UpdateContext) {
        self.spawns.clear();
        let dt = ctx.delta_ms as f32 / 1000.0;

        for entity in self.entities.values_mut() {
            entity.age_ms = entity.age_ms.saturating_add(ctx.delta_ms);
            match entity.kind {
                EntityKind::Walker => {
                    let angle = entity.position.to_angle() + 0.5 * dt;
                    entity.position = Vec2::from_angle(angle) * entity.position.length();
                    entity.rotation = angle;
                    entity.sprite.direction = if angle.sin() < 0.0 {
                        DirectionFlags::FACING_LEFT
                    } else {
                        DirectionFlags::empty()
                    };
                }
                EntityKind::Shield => {
                    entity.rotation = (entity.rotation + TAU * dt) % TAU;
                }
                EntityKind::Projectile => {
                    entity.position += entity.velocity * dt;
                }
            }
        }

        let expired: Vec<EntityId> = self
            .entities
            .iter()
            .filter(|(_, e)| e.kind == EntityKind::Projectile && e.age_ms >= PROJECTILE_LIFETIME_MS)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.despawn(id, ctx.timestamp);
        }

        self.projectile_timer_ms += ctx.delta_ms;
        if self.projectile_timer_ms >= PROJECTILE_INTERVAL_MS {
            self.projectile_timer_ms = 0;
            self.fire_projectile(ctx.timestamp);
        }

        self.hit_timer_ms += ctx.delta_ms;
        if self.hit_timer_ms >= HIT_INTERVAL_MS {
            self.hit_timer_ms = 0;
            self.hit_walkers(ctx.timestamp);
        }
    }

    fn fire_projectile(&mut self, timestamp: u32) {
        let Some((origin, heading)) = self
            .entities
            .values()
            .find(|e| e.kind == EntityKind::Walker)
            .map(|e| (e.position, e.rotation))
        else {
            return;
        };

        let mut projectile = DemoEntity::new(EntityKind::Projectile, origin, 0x3000);
        projectile.velocity = Vec2::from_angle(heading) * PROJECTILE_SPEED;
        projectile.rotation = heading;
        if self.spawn(projectile, timestamp).is_none() {
            log::debug!("no free id for projectile");
        }
    }

    fn hit_walkers(&mut self, timestamp: u32) {
        for damage in self.entities.values_mut().filter_map(|e| e.damage.as_mut()) {
            damage.health = if damage.health <= 5 {
                damage.full_health
            } else {
                damage.health - 5
            };
            damage.last_damage = timestamp;
        }
    }

    fn local_transform(entity: &DemoEntity) -> Affine2 {
        math::compose(entity.position, entity.rotation)
    }
}

impl EntityStore for DemoWorld {
    fn for_each_live_entity(&self, f: &mut dyn FnMut(EntityId)) {
        for id in self.entities.keys() {
            f(*id);
        }
    }

    fn world_transform(&self, id: EntityId) -> Option<Affine2> {
        let entity = self.entities.get(&id)?;
        let local = Self::local_transform(entity);
        match entity.parent {
            Some(parent) => Some(self.world_transform(parent)? * local),
            None => Some(local),
        }
    }

    fn world_bounding_box(&self, id: EntityId) -> Option<Quad> {
        let (position, _) = math::decompose(&self.world_transform(id)?);
        Some(Quad::from_center(position, Vec2::ONE))
    }

    fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.entities.get(&id)?.parent
    }

    fn spawn_events(&self) -> &[SpawnEvent] {
        &self.spawns
    }

    fn level_metadata(&self) -> LevelMetadata {
        self.metadata
    }
}

impl SpriteStore for DemoWorld {
    fn sprite(&self, id: EntityId) -> Option<SpriteState> {
        self.entities.get(&id).map(|e| e.sprite)
    }
}

impl DamageStore for DemoWorld {
    fn damage(&self, id: EntityId) -> Option<DamageState> {
        self.entities.get(&id)?.damage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica::TickClock;

    #[test]
    fn populate_spawns_walkers_with_shields() {
        let mut world = DemoWorld::new(64);
        world.populate(3);

        assert_eq!(world.len(), 6);
        assert_eq!(world.spawn_events().len(), 6);
        assert_eq!(world.parent(1), Some(0));
        assert!(world.damage(0).unwrap().is_boss);
    }

    #[test]
    fn shield_follows_its_walker() {
        let mut world = DemoWorld::new(8);
        world.populate(1);
        let walker = world.entities[&0].position;

        let (shield, _) = math::decompose(&world.world_transform(1).unwrap());
        assert!((shield - walker - Vec2::new(1.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn despawned_ids_are_recycled() {
        let mut world = DemoWorld::new(2);
        let a = world.spawn(DemoEntity::new(EntityKind::Projectile, Vec2::ZERO, 1), 0);
        let b = world.spawn(DemoEntity::new(EntityKind::Projectile, Vec2::ZERO, 1), 0);
        assert_eq!((a, b), (Some(0), Some(1)));
        assert!(world.spawn(DemoEntity::new(EntityKind::Projectile, Vec2::ZERO, 1), 0).is_none());

        assert!(world.despawn(0, 10));
        assert_eq!(world.spawn(DemoEntity::new(EntityKind::Projectile, Vec2::ZERO, 1), 20), Some(0));
    }

    #[test]
    fn projectiles_fire_and_expire() {
        let mut world = DemoWorld::new(16);
        world.populate(1);
        let mut clock = TickClock::with_tick_ms(100);

        let mut fired = None;
        let mut expired = None;
        for _ in 0..40 {
            let ctx = clock.advance();
            world.step(&ctx);
            for event in world.spawn_events() {
                if event.spawn {
                    fired.get_or_insert(ctx.timestamp);
                } else {
                    expired.get_or_insert(ctx.timestamp);
                }
            }
        }

        assert_eq!(fired, Some(2000));
        assert_eq!(expired, Some(3500));
    }
}
