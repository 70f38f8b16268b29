use std::time::{Duration, Instant};

use replica::{
    ClientConfig, ClientManager, ClientReplicator, ClientStatus, FixedTimestep, Inbound, Message,
    NetError, PositionPrediction, SpawnPrediction, TickClock, UpdateContext,
};

use crate::world::ClientWorld;

/// One client connection plus everything fed by it.
pub struct Session {
    manager: ClientManager,
    viewport: ClientReplicator,
    positions: PositionPrediction,
    spawns: SpawnPrediction,
    world: ClientWorld,
    timestep: FixedTimestep,
    clock: TickClock,
    last_tick_time: Instant,
    last_status: ClientStatus,
}

impl Session {
    pub fn new(config: ClientConfig, max_entities: u32, tick_rate: u32) -> Result<Self, NetError> {
        let viewport = ClientReplicator::new(config.viewport_interval_ms);
        let mut manager = ClientManager::new(config);
        manager.start()?;

        Ok(Self {
            last_status: manager.status(),
            manager,
            viewport,
            positions: PositionPrediction::new(max_entities),
            spawns: SpawnPrediction::new(),
            world: ClientWorld::new(),
            timestep: FixedTimestep::new(tick_rate),
            clock: TickClock::new(tick_rate),
            last_tick_time: Instant::now(),
        })
    }

    /// Runs forever, or for `max_ticks` simulation ticks.
    pub fn run(&mut self, max_ticks: Option<u64>) {
        let mut ticks = 0;
        loop {
            ticks += self.tick_once();
            if max_ticks.is_some_and(|max| ticks >= max) {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.manager.disconnect();
    }

    pub fn tick_once(&mut self) -> u64 {
        let now = Instant::now();
        self.timestep
            .accumulate((now - self.last_tick_time).as_secs_f32());
        self.last_tick_time = now;

        let mut ticks = 0;
        while self.timestep.consume_tick() {
            let ctx = self.clock.advance();
            self.tick(&ctx);
            ticks += 1;
        }
        ticks
    }

    fn tick(&mut self, ctx: &UpdateContext) {
        self.manager.update(ctx);
        self.track_status();

        for inbound in self.manager.drain_messages() {
            self.handle(inbound);
        }

        let server_time = self.manager.server_time_predicted();
        self.positions.update(server_time, &mut self.world);
        self.spawns
            .update(server_time, &mut self.positions, &mut self.world);

        if let Some(camera) = self.world.camera() {
            self.viewport.set_viewport(camera);
        }
        if let Err(e) = self.viewport.update(ctx, &mut self.manager) {
            log::warn!("failed to send viewport: {}", e);
        }

        if ctx.frame_count % (self.timestep.tick_rate() as u64 * 5) == 0 && self.manager.is_connected() {
            log::info!(
                "server time {}, rtt {:?} ms, {} sprites, {} pending despawns",
                server_time,
                self.manager.rtt(),
                self.world.visible_count(),
                self.spawns.pending().len()
            );
        }
    }

    fn handle(&mut self, inbound: Inbound) {
        match inbound.message {
            Message::Transform(transform) => {
                self.positions.handle_transform(&transform);
            }
            Message::Spawn(spawn) => self.spawns.handle_spawn(&spawn, &mut self.positions),
            Message::Sprite(sprite) => self.world.apply_sprite(&sprite),
            Message::DamageInfo(damage) => self.world.apply_damage(&damage),
            Message::LevelMetadata(level) => self.world.apply_level(&level),
            Message::Text(text) => log::info!("server says: {}", text.text()),
            other => log::debug!("unhandled {} from {}", other.name(), inbound.sender),
        }
    }

    fn track_status(&mut self) {
        let status = self.manager.status();
        if status == self.last_status {
            return;
        }
        if status != ClientStatus::Connected {
            // The next server's clock may start over.
            self.world.clear();
            self.positions.clear();
            self.spawns.clear();
        }
        self.last_status = status;
    }
}
