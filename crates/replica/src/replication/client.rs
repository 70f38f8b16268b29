use crate::math::Quad;
use crate::net::client::ClientManager;
use crate::net::connection::NetError;
use crate::net::protocol::ViewportMessage;
use crate::simulation::UpdateContext;

/// Reports the local camera rectangle to the server on a fixed interval.
pub struct ClientReplicator {
    interval_ms: u32,
    elapsed_ms: u32,
    viewport: Option<Quad>,
}

impl ClientReplicator {
    pub fn new(interval_ms: u32) -> Self {
        Self {
            interval_ms,
            elapsed_ms: 0,
            viewport: None,
        }
    }

    pub fn set_viewport(&mut self, viewport: Quad) {
        self.viewport = Some(viewport);
    }

    /// Returns the message due this tick, if any.
    pub fn poll(&mut self, ctx: &UpdateContext, connected: bool) -> Option<ViewportMessage> {
        if !connected {
            self.elapsed_ms = 0;
            return None;
        }

        self.elapsed_ms = self.elapsed_ms.saturating_add(ctx.delta_ms);
        if self.elapsed_ms < self.interval_ms {
            return None;
        }
        let viewport = self.viewport?;
        self.elapsed_ms = 0;

        Some(ViewportMessage {
            message_id: 0,
            viewport: viewport.to_array(),
        })
    }

    /// Sends the viewport through `client` when due. Returns whether a
    /// message went out.
    pub fn update(&mut self, ctx: &UpdateContext, client: &mut ClientManager) -> Result<bool, NetError> {
        match self.poll(ctx, client.is_connected()) {
            Some(message) => client.send_message(message).map(|_| true),
            None => Ok(false),
        }
    }
}
