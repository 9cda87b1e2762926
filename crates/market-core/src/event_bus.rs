//! Event bus for workflow progress and cache invalidation.
//!
//! A broadcast channel: every subscriber sees every event published after it
//! subscribed. Data-fetching layers subscribe here to learn which cached
//! views a finished workflow has made stale.

use market_types::{CacheEvent, CacheTopic, MarketEvent, WorkflowEvent};
use tokio::sync::broadcast;

/// Event bus for broadcasting marketplace events to multiple subscribers.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<MarketEvent>,
}

impl EventBus {
	/// Creates a new EventBus buffering up to `capacity` events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Returns an error if there are no active subscribers, which callers
	/// are free to ignore.
	pub fn publish(
		&self,
		event: MarketEvent,
	) -> Result<(), broadcast::error::SendError<MarketEvent>> {
		self.sender.send(event)?;
		Ok(())
	}

	pub(crate) fn workflow(&self, event: WorkflowEvent) {
		self.publish(MarketEvent::Workflow(event)).ok();
	}

	pub(crate) fn invalidate(&self, topics: Vec<CacheTopic>) {
		if topics.is_empty() {
			return;
		}
		self.publish(MarketEvent::Cache(CacheEvent::Invalidated { topics }))
			.ok();
	}
}
