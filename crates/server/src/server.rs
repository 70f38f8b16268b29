use std::time::{Duration, Instant};

use replica::{
    Address, FixedTimestep, NetConfig, NetError, ReplicationSources, ServerEvent, ServerManager,
    ServerReplicator, TickClock,
};

use crate::simulation::DemoWorld;

const STATUS_INTERVAL_SECS: u64 = 5;

pub struct GameServer {
    manager: ServerManager,
    replicator: ServerReplicator,
    world: DemoWorld,
    timestep: FixedTimestep,
    clock: TickClock,
    last_tick_time: Instant,
}

impl GameServer {
    pub fn new(config: &NetConfig, tick_rate: u32, walkers: u32) -> Result<Self, NetError> {
        let mut manager = ServerManager::new(config.server.clone());
        manager.start()?;

        let mut world = DemoWorld::new(config.replication.max_entities);
        world.populate(walkers);

        Ok(Self {
            manager,
            replicator: ServerReplicator::new(config.replication.clone()),
            world,
            timestep: FixedTimestep::new(tick_rate),
            clock: TickClock::new(tick_rate),
            last_tick_time: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> Option<Address> {
        self.manager.local_addr()
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
        self.manager.quit();
    }

    /// Runs every tick that is due since the last call.
    pub fn tick_once(&mut self) -> u64 {
        let now = Instant::now();
        self.timestep
            .accumulate((now - self.last_tick_time).as_secs_f32());
        self.last_tick_time = now;

        let mut ticks = 0;
        while self.timestep.consume_tick() {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    fn tick(&mut self) {
        let ctx = self.clock.advance();

        self.manager.update(&ctx);
        self.log_events();

        self.world.step(&ctx);
        let sources = ReplicationSources::new(&self.world)
            .with_sprites(&self.world)
            .with_damage(&self.world);
        let stats = self
            .replicator
            .update_server(&ctx, &mut self.manager, sources);

        let status_every = self.timestep.tick_rate() as u64 * STATUS_INTERVAL_SECS;
        if ctx.frame_count % status_every == 0 {
            log::info!(
                "t={} {} clients, {} entities, {} datagrams last tick",
                ctx.timestamp,
                self.manager.client_count(),
                self.world.len(),
                stats.datagrams_sent
            );
        }
    }

    fn log_events(&mut self) {
        for event in self.manager.drain_events() {
            match event {
                ServerEvent::ClientConnected { addr } => {
                    log::info!("client {} connected", addr);
                }
                ServerEvent::ClientDisconnected { addr, reason } => {
                    log::info!("client {} {}", addr, reason.as_str());
                }
                ServerEvent::Message { addr, message } => {
                    log::info!("{} from {}", message.name(), addr);
                }
            }
        }
    }
}
