use crate::error::GcmError;
use crate::types::Lock;
use rand::seq::SliceRandom;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Typed resolution strategy (spec.md §4.C / Design Notes: "the internal
/// policy engine MUST take a typed strategy variant"). String parsing from
/// the `priority|youngest|oldest|random|manual` wire format happens only at
/// the control-plane boundary, via [`FromStr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
	PriorityBased,
	YoungestFirst,
	OldestFirst,
	Random,
	Manual,
}

impl Strategy {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::PriorityBased => "priority",
			Self::YoungestFirst => "youngest",
			Self::OldestFirst => "oldest",
			Self::Random => "random",
			Self::Manual => "manual",
		}
	}
}

impl fmt::Display for Strategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Strategy {
	type Err = GcmError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"priority" => Ok(Self::PriorityBased),
			"youngest" => Ok(Self::YoungestFirst),
			"oldest" => Ok(Self::OldestFirst),
			"random" => Ok(Self::Random),
			"manual" => Ok(Self::Manual),
			other => Err(GcmError::InvalidStrategy(other.to_string())),
		}
	}
}

/// Selects a victim lock among `holder_locks` (the locks held by actors
/// participating in `cycle`), per the rules in spec.md §4.C.
///
/// `holder_locks` must be non-empty for every strategy but `Manual`, which
/// instead requires `manual_victim` to be `Some`.
pub fn select_victim(cycle: &[String], strategy: Strategy, holder_locks: &[Lock], manual_victim: Option<Uuid>) -> Result<Uuid, GcmError> {
	if strategy == Strategy::Manual {
		return manual_victim.ok_or_else(|| GcmError::ManualStrategyRequiresVictim { cycle: cycle.to_vec() });
	}

	if holder_locks.is_empty() {
		return Err(GcmError::ManualStrategyRequiresVictim { cycle: cycle.to_vec() });
	}

	let victim = match strategy {
		Strategy::PriorityBased => holder_locks
			.iter()
			.max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.acquired_at.cmp(&b.acquired_at)))
			.expect("non-empty checked above"),
		Strategy::YoungestFirst => holder_locks
			.iter()
			.max_by(|a, b| a.acquired_at.cmp(&b.acquired_at).then_with(|| a.priority.cmp(&b.priority)))
			.expect("non-empty checked above"),
		Strategy::OldestFirst => holder_locks
			.iter()
			.min_by(|a, b| a.acquired_at.cmp(&b.acquired_at).then_with(|| b.priority.cmp(&a.priority)))
			.expect("non-empty checked above"),
		Strategy::Random => holder_locks.choose(&mut rand::thread_rng()).expect("non-empty checked above"),
		Strategy::Manual => unreachable!("handled above"),
	};

	Ok(victim.lock_id)
}
