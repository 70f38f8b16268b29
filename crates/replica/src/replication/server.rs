use std::collections::HashSet;

use glam::Vec2;

use super::keyframe::KeyframeWindow;
use super::world::{DamageState, DamageStore, EntityStore, SpriteState, SpriteStore};
use crate::config::ReplicationConfig;
use crate::math::{self, Quad};
use crate::net::Address;
use crate::net::batch::{BatchedMessageSender, SendQueue};
use crate::net::connection::NetworkPipe;
use crate::net::protocol::{
    DamageInfoMessage, EntityId, LevelMetadataMessage, NO_PARENT, SpawnMessage, SpriteMessage,
    TransformMessage,
};
use crate::net::server::{ClientRecord, ServerManager};
use crate::simulation::UpdateContext;

#[derive(Debug, Clone, Copy, Default)]
struct TransformRecord {
    position: Vec2,
    rotation: f32,
    parent: Option<EntityId>,
    settled: bool,
    sent: bool,
    timer_ms: u32,
}

impl TransformRecord {
    fn unchanged(&self, position: Vec2, rotation: f32, parent: Option<EntityId>) -> bool {
        self.sent
            && self.parent == parent
            && math::pretty_much_equals_vec(self.position, position)
            && math::pretty_much_equals(self.rotation, rotation)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SpriteRecord {
    last: Option<SpriteState>,
    timer_ms: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct DamageRecord {
    last: Option<DamageState>,
}

/// A connected client as the replicator sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplicationTarget {
    pub addr: Address,
    pub viewport: Option<Quad>,
}

impl From<&ClientRecord> for ReplicationTarget {
    fn from(record: &ClientRecord) -> Self {
        Self {
            addr: record.addr,
            viewport: record.viewport,
        }
    }
}

/// World accessors read during one replication tick.
#[derive(Clone, Copy)]
pub struct ReplicationSources<'a> {
    pub entities: &'a dyn EntityStore,
    pub sprites: Option<&'a dyn SpriteStore>,
    pub damage: Option<&'a dyn DamageStore>,
}

impl<'a> ReplicationSources<'a> {
    pub fn new(entities: &'a dyn EntityStore) -> Self {
        Self {
            entities,
            sprites: None,
            damage: None,
        }
    }

    pub fn with_sprites(mut self, sprites: &'a dyn SpriteStore) -> Self {
        self.sprites = Some(sprites);
        self
    }

    pub fn with_damage(mut self, damage: &'a dyn DamageStore) -> Self {
        self.damage = Some(damage);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub entities: usize,
    pub new_clients: usize,
    pub spawns_sent: usize,
    pub transforms_sent: usize,
    pub sprites_sent: usize,
    pub damage_sent: usize,
    pub culled: usize,
    pub datagrams_sent: usize,
    pub datagrams_deferred: usize,
    pub datagrams_dropped: usize,
}

struct EntityPlan {
    forced: bool,
    bounds: Option<Quad>,
    transform: Option<TransformMessage>,
    transform_due: bool,
    sprite: Option<SpriteMessage>,
    sprite_due: bool,
    damage: Option<DamageInfoMessage>,
    damage_due: bool,
}

/// Decides every tick which entity state goes to which client.
pub struct ServerReplicator {
    config: ReplicationConfig,
    transforms: Vec<TransformRecord>,
    sprites: Vec<SpriteRecord>,
    damage: Vec<DamageRecord>,
    keyframes: KeyframeWindow,
    known_clients: HashSet<Address>,
    send_queue: SendQueue,
}

impl ServerReplicator {
    pub fn new(config: ReplicationConfig) -> Self {
        let slots = config.max_entities as usize;
        Self {
            transforms: vec![TransformRecord::default(); slots],
            sprites: vec![SpriteRecord::default(); slots],
            damage: vec![DamageRecord::default(); slots],
            keyframes: KeyframeWindow::new(config.max_entities),
            known_clients: HashSet::new(),
            send_queue: SendQueue::new(),
            config,
        }
    }

    pub fn keyframes(&self) -> &KeyframeWindow {
        &self.keyframes
    }

    pub fn pending_datagrams(&self) -> usize {
        self.send_queue.len()
    }

    /// Replicates to every client currently connected to `server`.
    pub fn update_server(
        &mut self,
        ctx: &UpdateContext,
        server: &mut ServerManager,
        sources: ReplicationSources<'_>,
    ) -> ReplicationStats {
        let targets: Vec<ReplicationTarget> = server.clients().map(ReplicationTarget::from).collect();
        self.update(ctx, &targets, sources, server)
    }

    pub fn update(
        &mut self,
        ctx: &UpdateContext,
        targets: &[ReplicationTarget],
        sources: ReplicationSources<'_>,
        pipe: &mut dyn NetworkPipe,
    ) -> ReplicationStats {
        let mut stats = ReplicationStats::default();
        let entities = sources.entities;

        let spawn_events = entities.spawn_events();
        let mut spawned_now = HashSet::new();
        for event in spawn_events {
            // A recycled id must not be compared against its previous occupant.
            if let Some(slot) = self.slot(event.entity) {
                self.transforms[slot] = TransformRecord::default();
                self.sprites[slot] = SpriteRecord::default();
                self.damage[slot] = DamageRecord::default();
            }
            if event.spawn {
                spawned_now.insert(event.entity);
            }
        }

        let mut live = Vec::new();
        entities.for_each_live_entity(&mut |id| live.push(id));
        stats.entities = live.len();
        self.keyframes.resize(live.len(), self.config.keyframe_divisor);

        let mut plans = Vec::with_capacity(live.len());
        for &id in &live {
            let forced = self.keyframes.contains(id) || spawned_now.contains(&id);
            if let Some(plan) = self.plan_entity(ctx, id, forced, sources) {
                plans.push(plan);
            }
        }

        let metadata = entities.level_metadata();
        let metadata = LevelMetadataMessage {
            message_id: 0,
            camera_position: metadata.camera_position.to_array(),
            camera_size: metadata.camera_size.to_array(),
            background_texture_hash: metadata.background_texture_hash,
            world_file_hash: metadata.world_file_hash,
        };

        for target in targets {
            let new_client = !self.known_clients.contains(&target.addr);
            let visible_area = target
                .viewport
                .map(|viewport| viewport.expanded(self.config.viewport_margin));

            let mut sender = BatchedMessageSender::new(target.addr, &mut self.send_queue);
            if new_client {
                log::debug!("first replication for {}", target.addr);
                sender.send(&metadata);
                stats.new_clients += 1;
            }

            for event in spawn_events {
                sender.send(&SpawnMessage::new(event.entity, event.spawn, event.timestamp));
                stats.spawns_sent += 1;
            }

            for plan in &plans {
                if let Some(transform) = &plan.transform {
                    let visible = match (visible_area, plan.bounds) {
                        (Some(area), Some(bounds)) => area.overlaps(&bounds),
                        _ => true,
                    };
                    if new_client || plan.forced || (plan.transform_due && visible) {
                        sender.send(transform);
                        stats.transforms_sent += 1;
                    } else if plan.transform_due {
                        stats.culled += 1;
                    }
                }

                if let Some(sprite) = &plan.sprite {
                    if new_client || plan.sprite_due {
                        sender.send(sprite);
                        stats.sprites_sent += 1;
                    }
                }

                if let Some(damage) = &plan.damage {
                    if new_client || plan.damage_due {
                        sender.send(damage);
                        stats.damage_sent += 1;
                    }
                }
            }
        }

        self.known_clients = targets.iter().map(|t| t.addr).collect();
        let known = &self.known_clients;
        self.send_queue.retain(|batch| known.contains(&batch.addr));

        self.keyframes.advance();
        self.drain_send_queue(pipe, &mut stats);

        log::debug!(
            "replicated {} entities: {} transforms, {} sprites, {} spawns, {} culled, {} datagrams",
            stats.entities,
            stats.transforms_sent,
            stats.sprites_sent,
            stats.spawns_sent,
            stats.culled,
            stats.datagrams_sent
        );
        stats
    }

    fn slot(&self, id: EntityId) -> Option<usize> {
        let slot = id as usize;
        (slot < self.transforms.len()).then_some(slot)
    }

    fn plan_entity(
        &mut self,
        ctx: &UpdateContext,
        id: EntityId,
        forced: bool,
        sources: ReplicationSources<'_>,
    ) -> Option<EntityPlan> {
        let Some(slot) = self.slot(id) else {
            log::debug!("entity {} is outside the {} replicated slots", id, self.transforms.len());
            return None;
        };
        let interval = self.config.replication_interval_ms;

        let mut plan = EntityPlan {
            forced,
            bounds: sources.entities.world_bounding_box(id),
            transform: None,
            transform_due: false,
            sprite: None,
            sprite_due: false,
            damage: None,
            damage_due: false,
        };

        if let Some(world) = sources.entities.world_transform(id) {
            let (position, rotation) = math::decompose(&world);
            let parent = sources.entities.parent(id);
            let record = &mut self.transforms[slot];
            record.timer_ms = record.timer_ms.saturating_sub(ctx.delta_ms);

            let unchanged = record.unchanged(position, rotation, parent);
            plan.transform_due =
                forced || (record.timer_ms == 0 && (!unchanged || !record.settled));

            if plan.transform_due {
                *record = TransformRecord {
                    position,
                    rotation,
                    parent,
                    settled: unchanged,
                    sent: true,
                    timer_ms: interval,
                };
            }

            plan.transform = Some(TransformMessage {
                message_id: 0,
                entity_id: id,
                timestamp: ctx.timestamp,
                position: position.to_array(),
                rotation,
                parent_id: parent.unwrap_or(NO_PARENT),
                settled: unchanged as u8,
                _padding: [0; 3],
            });
        }

        if let Some(sprite) = sources.sprites.and_then(|store| store.sprite(id)) {
            let record = &mut self.sprites[slot];
            record.timer_ms = record.timer_ms.saturating_sub(ctx.delta_ms);

            let changed = record.last.is_none_or(|last| !last.same_look(&sprite));
            plan.sprite_due = forced || (record.timer_ms == 0 && changed);
            if plan.sprite_due {
                record.last = Some(sprite);
                record.timer_ms = interval;
            }

            plan.sprite = Some(SpriteMessage {
                message_id: 0,
                entity_id: id,
                sprite_hash: sprite.sprite_hash,
                hex_color: sprite.hex_color,
                animation_id: sprite.animation_id,
                properties: sprite.direction.bits(),
                layer: sprite.layer,
                shadow_offset: sprite.shadow_offset.to_array(),
                shadow_size: sprite.shadow_size,
            });
        }

        if let Some(damage) = sources.damage.and_then(|store| store.damage(id)) {
            let record = &mut self.damage[slot];
            plan.damage_due =
                forced || record.last.is_none_or(|last| last.health != damage.health);
            if plan.damage_due {
                record.last = Some(damage);
            }

            plan.damage = Some(DamageInfoMessage {
                message_id: 0,
                entity_id: id,
                health: damage.health,
                full_health: damage.full_health,
                damage_timestamp: damage.last_damage,
                is_boss: damage.is_boss as u8,
                _padding: [0; 3],
            });
        }

        Some(plan)
    }

    fn drain_send_queue(&mut self, pipe: &mut dyn NetworkPipe, stats: &mut ReplicationStats) {
        while stats.datagrams_sent < self.config.max_datagrams_per_tick {
            let Some(mut batch) = self.send_queue.pop() else {
                break;
            };
            if let Err(e) = pipe.send_to(&mut batch.buffer, batch.addr) {
                log::warn!("failed to replicate to {}: {}", batch.addr, e);
            }
            stats.datagrams_sent += 1;
        }

        let backlog = self
            .config
            .max_datagrams_per_tick
            .saturating_mul(self.config.max_deferred_ticks);
        stats.datagrams_dropped = self.send_queue.truncate_oldest(backlog);
        if stats.datagrams_dropped > 0 {
            log::warn!(
                "send queue overflow: dropped {} oldest datagrams, keeping {}",
                stats.datagrams_dropped,
                backlog
            );
        }

        stats.datagrams_deferred = self.send_queue.len();
        if stats.datagrams_deferred > 0 {
            log::warn!(
                "send queue not draining: {} datagrams deferred to next tick",
                stats.datagrams_deferred
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::codec::{MessageBuffer, unpack_batch};
    use crate::net::connection::{ConnectionInfo, NetError};
    use crate::net::protocol::Message;
    use crate::replication::world::{LevelMetadata, SpawnEvent};
    use crate::simulation::TickClock;
    use glam::Affine2;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Default)]
    struct TestWorld {
        entities: BTreeMap<EntityId, (Vec2, f32, Option<EntityId>)>,
        spawns: Vec<SpawnEvent>,
        sprites: HashMap<EntityId, SpriteState>,
        damage: HashMap<EntityId, DamageState>,
    }

    impl TestWorld {
        fn place(&mut self, id: EntityId, position: Vec2) {
            self.entities.insert(id, (position, 0.0, None));
        }
    }

    impl EntityStore for TestWorld {
        fn for_each_live_entity(&self, f: &mut dyn FnMut(EntityId)) {
            self.entities.keys().for_each(|&id| f(id));
        }

        fn world_transform(&self, id: EntityId) -> Option<Affine2> {
            let (position, rotation, _) = self.entities.get(&id)?;
            Some(math::compose(*position, *rotation))
        }

        fn world_bounding_box(&self, id: EntityId) -> Option<Quad> {
            let (position, _, _) = self.entities.get(&id)?;
            Some(Quad::from_center(*position, Vec2::ONE))
        }

        fn parent(&self, id: EntityId) -> Option<EntityId> {
            self.entities.get(&id)?.2
        }

        fn spawn_events(&self) -> &[SpawnEvent] {
            &self.spawns
        }

        fn level_metadata(&self) -> LevelMetadata {
            LevelMetadata {
                background_texture_hash: 0xBEEF,
                ..Default::default()
            }
        }
    }

    impl SpriteStore for TestWorld {
        fn sprite(&self, id: EntityId) -> Option<SpriteState> {
            self.sprites.get(&id).copied()
        }
    }

    impl DamageStore for TestWorld {
        fn damage(&self, id: EntityId) -> Option<DamageState> {
            self.damage.get(&id).copied()
        }
    }

    #[derive(Default)]
    struct RecordingPipe {
        sent: Vec<(Address, Vec<u8>)>,
    }

    impl RecordingPipe {
        fn take_messages(&mut self) -> Vec<Message> {
            self.sent
                .drain(..)
                .flat_map(|(_, bytes)| {
                    unpack_batch(&bytes)
                        .unwrap()
                        .into_iter()
                        .map(|span| Message::decode(span).unwrap())
                        .collect::<Vec<_>>()
                })
                .collect()
        }
    }

    impl NetworkPipe for RecordingPipe {
        fn send_to(&mut self, buffer: &mut MessageBuffer, addr: Address) -> Result<usize, NetError> {
            self.sent.push((addr, buffer.as_bytes().to_vec()));
            Ok(buffer.len())
        }

        fn connection_info(&self) -> ConnectionInfo {
            ConnectionInfo::default()
        }
    }

    fn target(viewport: Option<Quad>) -> ReplicationTarget {
        ReplicationTarget {
            addr: "127.0.0.1:27016".parse().unwrap(),
            viewport,
        }
    }

    fn config(max_entities: u32) -> ReplicationConfig {
        ReplicationConfig {
            max_entities,
            ..Default::default()
        }
    }

    fn transform_ids(messages: &[Message]) -> Vec<(EntityId, bool)> {
        messages
            .iter()
            .filter_map(|m| match m {
                Message::Transform(t) => Some((t.entity_id, t.is_settled())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn new_client_gets_metadata_and_everything() {
        let mut world = TestWorld::default();
        world.place(1, Vec2::ZERO);
        world.place(2, Vec2::new(1000.0, 1000.0));

        let mut replicator = ServerReplicator::new(config(64));
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(50);
        let viewport = Some(Quad::new(Vec2::splat(-10.0), Vec2::splat(10.0)));

        let stats = replicator.update(
            &clock.advance(),
            &[target(viewport)],
            ReplicationSources::new(&world),
            &mut pipe,
        );

        let messages = pipe.take_messages();
        assert_eq!(stats.new_clients, 1);
        assert!(matches!(
            messages[0],
            Message::LevelMetadata(m) if m.background_texture_hash == 0xBEEF
        ));
        assert_eq!(transform_ids(&messages), vec![(1, false), (2, false)]);
    }

    #[test]
    fn resting_entity_settles_once_then_goes_quiet() {
        let mut world = TestWorld::default();
        world.place(20, Vec2::new(3.0, 4.0));

        let mut replicator = ServerReplicator::new(config(64));
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(50);
        let targets = [target(None)];

        let mut sends = Vec::new();
        for _ in 0..8 {
            replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
            sends.push(transform_ids(&pipe.take_messages()));
        }

        assert_eq!(sends[0], vec![(20, false)]);
        assert!(sends[1].is_empty());
        assert_eq!(sends[2], vec![(20, true)]);
        assert!(sends[3..].iter().all(Vec::is_empty));
    }

    #[test]
    fn moving_entity_is_throttled_to_interval() {
        let mut world = TestWorld::default();
        world.place(20, Vec2::ZERO);

        let mut replicator = ServerReplicator::new(config(64));
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(25);
        let targets = [target(None)];

        let mut sent_ticks = Vec::new();
        for tick in 0..9 {
            world.place(20, Vec2::new(tick as f32, 0.0));
            replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
            if !transform_ids(&pipe.take_messages()).is_empty() {
                sent_ticks.push(tick);
            }
        }

        assert_eq!(sent_ticks, vec![0, 4, 8]);
    }

    #[test]
    fn off_screen_entity_only_sent_on_keyframe() {
        let mut world = TestWorld::default();
        world.place(5, Vec2::new(500.0, 500.0));

        let mut replicator = ServerReplicator::new(config(8));
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(200);
        let targets = [target(Some(Quad::new(Vec2::ZERO, Vec2::splat(10.0))))];

        let mut sent_ticks = Vec::new();
        let mut culled = 0;
        for tick in 0..8 {
            world.place(5, Vec2::new(500.0 + tick as f32, 500.0));
            let stats =
                replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
            culled += stats.culled;
            if !transform_ids(&pipe.take_messages()).is_empty() {
                sent_ticks.push(tick);
            }
        }

        // Tick 0 is the new-client burst, tick 5 the keyframe for id 5.
        assert_eq!(sent_ticks, vec![0, 5]);
        assert_eq!(culled, 6);
    }

    #[test]
    fn margin_keeps_nearby_entities_visible() {
        let mut world = TestWorld::default();
        world.place(30, Vec2::new(13.0, 5.0));

        let mut replicator = ServerReplicator::new(config(64));
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(100);
        let targets = [target(Some(Quad::new(Vec2::ZERO, Vec2::splat(10.0))))];

        replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
        pipe.take_messages();

        world.place(30, Vec2::new(14.0, 5.0));
        let stats =
            replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
        assert_eq!(stats.culled, 0);
        assert_eq!(transform_ids(&pipe.take_messages()), vec![(30, false)]);
    }

    #[test]
    fn spawn_events_are_sent_and_force_the_entity() {
        let mut world = TestWorld::default();
        world.place(40, Vec2::ZERO);

        let mut replicator = ServerReplicator::new(config(64));
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(10);
        let targets = [target(Some(Quad::new(Vec2::splat(100.0), Vec2::splat(110.0))))];

        replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
        pipe.take_messages();

        world.place(41, Vec2::ZERO);
        world.spawns.push(SpawnEvent {
            entity: 41,
            spawn: true,
            timestamp: 20,
        });
        world.spawns.push(SpawnEvent {
            entity: 7,
            spawn: false,
            timestamp: 20,
        });
        let stats =
            replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);

        let messages = pipe.take_messages();
        let spawns: Vec<(EntityId, bool)> = messages
            .iter()
            .filter_map(|m| match m {
                Message::Spawn(s) => Some((s.entity_id, s.is_spawn())),
                _ => None,
            })
            .collect();
        assert_eq!(spawns, vec![(41, true), (7, false)]);
        assert_eq!(stats.spawns_sent, 2);
        // Off screen, but spawned this tick.
        assert_eq!(transform_ids(&messages), vec![(41, false)]);
    }

    #[test]
    fn sprite_and_damage_follow_changes() {
        let mut world = TestWorld::default();
        world.place(50, Vec2::ZERO);
        world.sprites.insert(
            50,
            SpriteState {
                sprite_hash: 7,
                animation_id: 1,
                ..Default::default()
            },
        );
        world.damage.insert(
            50,
            DamageState {
                health: 100,
                full_health: 100,
                ..Default::default()
            },
        );

        let mut replicator = ServerReplicator::new(config(64));
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(100);
        let targets = [target(None)];

        let first = replicator.update(
            &clock.advance(),
            &targets,
            ReplicationSources::new(&world).with_sprites(&world).with_damage(&world),
            &mut pipe,
        );
        assert_eq!((first.sprites_sent, first.damage_sent), (1, 1));
        pipe.take_messages();

        let quiet = replicator.update(
            &clock.advance(),
            &targets,
            ReplicationSources::new(&world).with_sprites(&world).with_damage(&world),
            &mut pipe,
        );
        assert_eq!((quiet.sprites_sent, quiet.damage_sent), (0, 0));

        world.damage.get_mut(&50).unwrap().health = 60;
        world.sprites.get_mut(&50).unwrap().animation_id = 2;
        let changed = replicator.update(
            &clock.advance(),
            &targets,
            ReplicationSources::new(&world).with_sprites(&world).with_damage(&world),
            &mut pipe,
        );
        assert_eq!((changed.sprites_sent, changed.damage_sent), (1, 1));

        let messages = pipe.take_messages();
        assert!(messages.iter().any(|m| matches!(m, Message::DamageInfo(d) if d.health == 60)));
        assert!(messages.iter().any(|m| matches!(m, Message::Sprite(s) if s.animation_id == 2)));
    }

    #[test]
    fn send_cap_defers_extra_datagrams() {
        let mut world = TestWorld::default();
        for id in 0..100 {
            world.place(id, Vec2::new(id as f32, 0.0));
        }

        let mut replicator = ServerReplicator::new(ReplicationConfig {
            max_entities: 128,
            max_datagrams_per_tick: 2,
            ..Default::default()
        });
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(10);
        let targets = [target(None)];

        // 100 transforms at 40 bytes each need 4 datagrams plus metadata.
        let first = replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
        assert_eq!(first.datagrams_sent, 2);
        assert!(first.datagrams_deferred >= 2);

        let second = replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
        assert_eq!(second.datagrams_sent, 2);
        assert_eq!(pipe.sent.len(), 4);
    }

    #[test]
    fn deferred_backlog_is_bounded() {
        let mut world = TestWorld::default();
        world.place(1, Vec2::ZERO);

        let mut replicator = ServerReplicator::new(ReplicationConfig {
            replication_interval_ms: 0,
            max_entities: 8,
            max_datagrams_per_tick: 16,
            max_deferred_ticks: 4,
            ..Default::default()
        });
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(16);
        let targets: Vec<ReplicationTarget> = (0..20)
            .map(|i| ReplicationTarget {
                addr: Address::from(([127, 0, 0, 1], 30000 + i)),
                viewport: None,
            })
            .collect();

        // Every client gets one datagram per tick, 20 against a cap of 16.
        let mut dropped = 0;
        for tick in 0..600 {
            world.place(1, Vec2::new(tick as f32, 0.0));
            let stats =
                replicator.update(&clock.advance(), &targets, ReplicationSources::new(&world), &mut pipe);
            assert_eq!(stats.datagrams_sent, 16);
            assert!(replicator.pending_datagrams() <= 64);
            dropped += stats.datagrams_dropped;
            pipe.sent.clear();
        }

        assert_eq!(replicator.pending_datagrams(), 64);
        assert!(dropped > 0);
    }

    #[test]
    fn departed_clients_lose_queued_datagrams() {
        let mut world = TestWorld::default();
        for id in 0..100 {
            world.place(id, Vec2::ZERO);
        }

        let mut replicator = ServerReplicator::new(ReplicationConfig {
            max_entities: 128,
            max_datagrams_per_tick: 1,
            ..Default::default()
        });
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(10);

        replicator.update(&clock.advance(), &[target(None)], ReplicationSources::new(&world), &mut pipe);
        assert!(replicator.pending_datagrams() > 0);

        replicator.update(&clock.advance(), &[], ReplicationSources::new(&world), &mut pipe);
        assert_eq!(replicator.pending_datagrams(), 0);
    }

    #[test]
    fn reconnecting_client_is_treated_as_new() {
        let mut world = TestWorld::default();
        world.place(3, Vec2::ZERO);

        let mut replicator = ServerReplicator::new(config(64));
        let mut pipe = RecordingPipe::default();
        let mut clock = TickClock::with_tick_ms(10);

        replicator.update(&clock.advance(), &[target(None)], ReplicationSources::new(&world), &mut pipe);
        replicator.update(&clock.advance(), &[], ReplicationSources::new(&world), &mut pipe);
        let stats =
            replicator.update(&clock.advance(), &[target(None)], ReplicationSources::new(&world), &mut pipe);

        assert_eq!(stats.new_clients, 1);
    }
}
