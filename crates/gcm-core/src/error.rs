use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the Lock Table and Resolution Policy Engine.
///
/// Propagation follows spec.md §7: errors from `acquire` propagate to the
/// caller; errors inside the Background Monitor or subscriber callbacks are
/// swallowed and counted instead (see [`crate::monitor::BackgroundMonitor`]).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GcmError {
	#[error("acquire of resource {resource} by actor {actor} timed out waiting on lock {lock_id}")]
	TimeoutError { lock_id: Uuid, actor: String, resource: String },

	#[error("waiter for resource {resource} by actor {actor} was cancelled (lock {lock_id})")]
	Cancelled { lock_id: Uuid, actor: String, resource: String },

	#[error("actor {actor} already holds resource {resource} under owner_tag {owner_tag}; reentrant acquire denied")]
	ReentrantDenied { actor: String, resource: String, owner_tag: String },

	#[error("no lock found for lock_id {lock_id}")]
	NotFound { lock_id: Uuid },

	#[error("unknown resolution strategy: {0}")]
	InvalidStrategy(String),

	#[error("MANUAL strategy requires an explicit victim_lock_id for cycle {cycle:?}")]
	ManualStrategyRequiresVictim { cycle: Vec<String> },
}

pub type Result<T> = std::result::Result<T, GcmError>;
