use server_api::ApiContext;
use shared::protocol::ServerEvent;
use tokio::sync::broadcast;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) events: broadcast::Sender<ServerEvent>,
}

impl AppState {
    /// Fans an event out to every connected socket; sockets filter by account.
    pub(crate) fn publish(&self, event: ServerEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}
