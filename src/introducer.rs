//! Discovery subscription interface and an in-process introducer

use crate::server::{Announcement, ServerId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Callback receiving `(server_id, announcement)` pairs from discovery
pub type AnnouncementHandler = Arc<dyn Fn(ServerId, Announcement) + Send + Sync>;

/// Client side of the discovery service
pub trait IntroducerClient: Send + Sync {
    /// Deliver every announcement for `service_name` to `handler` for the
    /// life of the subscription
    fn subscribe_to(&self, service_name: &str, handler: AnnouncementHandler);
}

#[derive(Default)]
struct IntroducerState {
    subscribers: Vec<(String, AnnouncementHandler)>,
    /// Latest announcement per (service, server), replayed to late subscribers
    announcements: Vec<(String, ServerId, Announcement)>,
}

/// Introducer that lives in the same process as its subscribers.
///
/// Announcements are routed by their `service-name`; an announcement without
/// one reaches nobody. Subscribers that join late first receive the latest
/// announcement of every server already heard from.
#[derive(Default)]
pub struct LocalIntroducer {
    state: RwLock<IntroducerState>,
}

impl LocalIntroducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an announcement to every matching subscriber
    pub fn publish(&self, server_id: &str, announcement: Announcement) {
        let Some(service) = announcement.service_name.clone() else {
            debug!("Dropping announcement from {} without a service name", server_id);
            return;
        };

        let handlers: Vec<AnnouncementHandler> = {
            let mut state = self.state.write();
            match state
                .announcements
                .iter_mut()
                .find(|(s, id, _)| *s == service && id == server_id)
            {
                Some(entry) => entry.2 = announcement.clone(),
                None => state.announcements.push((
                    service.clone(),
                    server_id.to_string(),
                    announcement.clone(),
                )),
            }

            state
                .subscribers
                .iter()
                .filter(|(s, _)| *s == service)
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };

        debug!(
            "Publishing {} announcement from {} to {} subscriber(s)",
            service,
            server_id,
            handlers.len()
        );
        for handler in handlers {
            handler(server_id.to_string(), announcement.clone());
        }
    }

    /// Servers heard from, across all services
    pub fn announcement_count(&self) -> usize {
        self.state.read().announcements.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.read().subscribers.len()
    }
}

impl IntroducerClient for LocalIntroducer {
    fn subscribe_to(&self, service_name: &str, handler: AnnouncementHandler) {
        let replay: Vec<(ServerId, Announcement)> = {
            let mut state = self.state.write();
            state
                .subscribers
                .push((service_name.to_string(), Arc::clone(&handler)));
            state
                .announcements
                .iter()
                .filter(|(s, _, _)| s == service_name)
                .map(|(_, id, ann)| (id.clone(), ann.clone()))
                .collect()
        };

        for (server_id, announcement) in replay {
            handler(server_id, announcement);
        }
    }
}
