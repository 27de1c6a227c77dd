use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use ao_domain::{Event, EventSink};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

const DEFAULT_RING_CAPACITY: usize = 256;
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Multi-producer, multi-consumer fan-out for a conversation's [`Event`] stream.
/// `publish` never blocks and never fails the caller: a slow or absent
/// subscriber only loses events, it never backs up the Turn Engine. A bounded ring buffer lets
/// a subscriber that joins mid-turn catch up on recent history before switching to the live
/// feed.
#[async_trait]
pub trait EventBusPort: EventSink {
    /// Returns the conversation's recent history (oldest first, bounded) plus a receiver for
    /// everything published from this point on.
    fn subscribe(&self, conversation_id: &str) -> (Vec<Event>, broadcast::Receiver<Event>);
}

struct ConversationChannel {
    sender: broadcast::Sender<Event>,
    ring: VecDeque<Event>,
}

/// The default Event Bus: one `broadcast` channel plus ring buffer per conversation id.
pub struct InMemoryEventBus {
    channels: Mutex<HashMap<String, ConversationChannel>>,
    ring_capacity: usize,
    channel_capacity: usize,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        InMemoryEventBus {
            channels: Mutex::new(HashMap::new()),
            ring_capacity: DEFAULT_RING_CAPACITY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn with_capacities(ring_capacity: usize, channel_capacity: usize) -> Self {
        InMemoryEventBus {
            channels: Mutex::new(HashMap::new()),
            ring_capacity,
            channel_capacity,
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        InMemoryEventBus::new()
    }
}

#[async_trait]
impl EventSink for InMemoryEventBus {
    async fn publish(&self, event: Event) {
        event.log();
        let mut guard = self.channels.lock();
        let channel = guard
            .entry(event.conversation_id().to_string())
            .or_insert_with(|| ConversationChannel {
                sender: broadcast::channel(self.channel_capacity).0,
                ring: VecDeque::new(),
            });

        if channel.ring.len() >= self.ring_capacity {
            channel.ring.pop_front();
        }
        channel.ring.push_back(event.clone());

        // No receivers is not an error: publish is fire-and-forget.
        let _ = channel.sender.send(event);
    }
}

impl EventBusPort for InMemoryEventBus {
    fn subscribe(&self, conversation_id: &str) -> (Vec<Event>, broadcast::Receiver<Event>) {
        let mut guard = self.channels.lock();
        let channel = guard
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationChannel {
                sender: broadcast::channel(self.channel_capacity).0,
                ring: VecDeque::new(),
            });
        (channel.ring.iter().cloned().collect(), channel.sender.subscribe())
    }
}

/// Adapts an `Arc<dyn EventBusPort>` to the narrower [`EventSink`] a [`ao_tools::ToolContext`]
/// holds, since converting the `Arc` itself between trait object types needs an explicit
/// adapter rather than relying on dyn-upcasting coercion.
pub struct EventSinkHandle(pub Arc<dyn EventBusPort>);

#[async_trait]
impl EventSink for EventSinkHandle {
    async fn publish(&self, event: Event) {
        self.0.publish(event).await;
    }
}
