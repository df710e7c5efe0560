//! Entity notifications
//!
//! Observers do not get called back. Each observer registers a listener and
//! receives [`SceneEvent`]s over a channel, then drains that channel when it
//! is safe to restructure itself. Notification therefore never runs observer
//! code in the middle of a scene mutation.

use super::entity::EntityId;
use crossbeam_channel::{Receiver, Sender};
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Identifies an event receiver registered with a scene
    pub struct ListenerId;

    /// Live subscription of a listener to one event of one entity
    pub struct SubscriptionToken;
}

/// Kinds of per-entity notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityEvent {
    /// The global transform or global bounding box changed
    TransformChanged,
    /// The entity is being destroyed
    AboutToDie,
}

/// Notification delivered to a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneEvent {
    /// The entity's global transform or global bounding box changed
    TransformChanged(EntityId),
    /// The entity is being destroyed; its handle no longer resolves once the
    /// event is received
    AboutToDie(EntityId),
}

impl SceneEvent {
    /// Entity the event is about
    pub const fn entity(&self) -> EntityId {
        match *self {
            Self::TransformChanged(id) | Self::AboutToDie(id) => id,
        }
    }

    const fn new(event: EntityEvent, entity: EntityId) -> Self {
        match event {
            EntityEvent::TransformChanged => Self::TransformChanged(entity),
            EntityEvent::AboutToDie => Self::AboutToDie(entity),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Subscription {
    pub(super) entity: EntityId,
    pub(super) event: EntityEvent,
    pub(super) listener: ListenerId,
}

/// Listener and subscription registry of a scene
#[derive(Debug, Default)]
pub(super) struct EventHub {
    listeners: SlotMap<ListenerId, Sender<SceneEvent>>,
    subscriptions: SlotMap<SubscriptionToken, Subscription>,
}

impl EventHub {
    pub(super) fn register_listener(&mut self) -> (ListenerId, Receiver<SceneEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let id = self.listeners.insert(sender);
        log::debug!("Registered scene listener {id:?}");
        (id, receiver)
    }

    /// Removes the listener and every subscription it holds.
    pub(super) fn unregister_listener(&mut self, listener: ListenerId) -> bool {
        if self.listeners.remove(listener).is_none() {
            return false;
        }
        self.subscriptions.retain(|_, sub| sub.listener != listener);
        log::debug!("Unregistered scene listener {listener:?}");
        true
    }

    pub(super) fn has_listener(&self, listener: ListenerId) -> bool {
        self.listeners.contains_key(listener)
    }

    pub(super) fn subscribe(&mut self, subscription: Subscription) -> SubscriptionToken {
        self.subscriptions.insert(subscription)
    }

    pub(super) fn unsubscribe(&mut self, token: SubscriptionToken) -> Option<Subscription> {
        self.subscriptions.remove(token)
    }

    pub(super) fn is_subscribed(&self, token: SubscriptionToken) -> bool {
        self.subscriptions.contains_key(token)
    }

    /// Delivers `event` to every live subscription in `tokens`.
    ///
    /// Tokens that no longer resolve are dropped from `tokens`. Delivery
    /// failures never reach the caller: a listener whose receiver is gone is
    /// unregistered together with its subscriptions.
    pub(super) fn dispatch(&mut self, tokens: &mut Vec<SubscriptionToken>, event: EntityEvent, entity: EntityId) {
        let mut dead = Vec::new();
        tokens.retain(|token| {
            let Some(sub) = self.subscriptions.get(*token) else {
                return false;
            };
            if sub.event != event {
                return true;
            }
            if let Some(sender) = self.listeners.get(sub.listener) {
                if sender.try_send(SceneEvent::new(event, entity)).is_err() {
                    dead.push(sub.listener);
                    return false;
                }
            }
            true
        });

        for listener in dead {
            if self.unregister_listener(listener) {
                log::warn!("Dropped scene listener {listener:?}: receiver disconnected");
            }
        }
    }
}
