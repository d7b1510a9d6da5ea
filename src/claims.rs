//! Reference counting by key, for values shared between concurrent callers.

use core::hash::Hash;
use hashbrown::{hash_map::Entry, HashMap};
use num_traits::{CheckedAdd, CheckedSub, Unsigned};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
	#[error("Too many concurrent claims on one key")]
	Saturated,
	#[error("Released a key that wasn't claimed")]
	NotClaimed,
}

/// Values with a count of current claimants each.
///
/// Releasing the last claim doesn't remove a value: it stays available to new claimants
/// until [`evict_unclaimed`](`ClaimMap::evict_unclaimed`) runs, so that callers arriving shortly after can still share it.
#[derive(Debug)]
pub struct ClaimMap<K, V, C = u16> {
	entries: HashMap<K, Claimed<C, V>>,
}

#[derive(Debug)]
struct Claimed<C, V> {
	claims: C,
	value: V,
}

impl<K, V, C> Default for ClaimMap<K, V, C> {
	fn default() -> Self {
		Self { entries: HashMap::new() }
	}
}

impl<K, V, C> ClaimMap<K, V, C>
where
	K: Hash + Eq,
	C: Unsigned + CheckedAdd + CheckedSub + Copy,
{
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Claims the value at `key`, first creating it with `create` if there is none.
	///
	/// # Errors
	///
	/// [`ClaimError::Saturated`] iff the claim count would overflow `C`. Nothing is claimed in that case.
	pub fn claim(&mut self, key: K, create: impl FnOnce() -> V) -> Result<&V, ClaimError> {
		match self.entries.entry(key) {
			Entry::Occupied(occupied) => {
				let claimed = occupied.into_mut();
				claimed.claims = claimed.claims.checked_add(&C::one()).ok_or(ClaimError::Saturated)?;
				Ok(&claimed.value)
			}
			Entry::Vacant(vacant) => Ok(&vacant.insert(Claimed { claims: C::one(), value: create() }).value),
		}
	}

	/// Gives up one claim on `key`. Returns whether that was the last one.
	///
	/// # Errors
	///
	/// [`ClaimError::NotClaimed`] iff `key` has no claims left to release (or no value at all).
	pub fn release(&mut self, key: &K) -> Result<bool, ClaimError> {
		let claimed = self.entries.get_mut(key).ok_or(ClaimError::NotClaimed)?;
		claimed.claims = claimed.claims.checked_sub(&C::one()).ok_or(ClaimError::NotClaimed)?;
		Ok(claimed.claims.is_zero())
	}

	/// Current claim count at `key`.
	#[must_use]
	pub fn claims(&self, key: &K) -> Option<C> {
		self.entries.get(key).map(|claimed| claimed.claims)
	}

	/// Removes and returns every value nobody claims anymore.
	pub fn evict_unclaimed(&mut self) -> impl '_ + Iterator<Item = (K, V)> {
		self.entries.extract_if(|_, claimed| claimed.claims.is_zero()).map(|(key, claimed)| (key, claimed.value))
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn released_values_stay_until_evicted() {
		let mut map = ClaimMap::<&str, i32>::new();
		assert_eq!(*map.claim("a", || 1).unwrap(), 1);
		assert_eq!(*map.claim("a", || 99).unwrap(), 1);
		assert_eq!(map.claims(&"a"), Some(2));

		assert_eq!(map.release(&"a"), Ok(false));
		assert_eq!(map.evict_unclaimed().count(), 0);

		assert_eq!(map.release(&"a"), Ok(true));
		assert_eq!(*map.claim("a", || 99).unwrap(), 1, "unclaimed values can be revived");
		assert_eq!(map.release(&"a"), Ok(true));

		assert_eq!(map.evict_unclaimed().collect::<Vec<_>>(), [("a", 1)]);
		assert!(map.is_empty());
	}

	#[test]
	fn misuse_is_reported() {
		let mut map = ClaimMap::<&str, (), u8>::new();
		for _ in 0..255 {
			map.claim("a", || ()).unwrap();
		}
		assert_eq!(map.claim("a", || ()).unwrap_err(), ClaimError::Saturated);
		assert_eq!(map.claims(&"a"), Some(255));

		assert_eq!(map.release(&"b"), Err(ClaimError::NotClaimed));
		let mut released = ClaimMap::<&str, (), u8>::new();
		released.claim("c", || ()).unwrap();
		released.release(&"c").unwrap();
		assert_eq!(released.release(&"c"), Err(ClaimError::NotClaimed));
	}
}
