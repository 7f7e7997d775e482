//! Table state and batch application shared by the built-in backends.

// std
use std::collections::{BTreeSet, btree_map::Entry};
// crates.io
use serde::{Deserializer, Serializer, de::Error as _};
// self
use crate::{
	_prelude::*,
	store::{CommitOutcome, Document, Table, WriteBatch, WriteOp},
};

/// In-memory image of every table.
///
/// Serialized as a map keyed by [`Table::as_str`], so decode errors name the table.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Tables(BTreeMap<Table, BTreeMap<String, Document>>);
impl Tables {
	pub(crate) fn get(&self, table: Table, key: &str, now: OffsetDateTime) -> Option<&Document> {
		self.0.get(&table)?.get(key).filter(|doc| !doc.is_expired(now))
	}

	pub(crate) fn scan(&self, table: Table, now: OffsetDateTime) -> Vec<(String, Document)> {
		self.0
			.get(&table)
			.map(|docs| {
				docs.iter()
					.filter(|(_, doc)| !doc.is_expired(now))
					.map(|(key, doc)| (key.clone(), doc.clone()))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Drops `key` if it has expired, returning whether anything was removed.
	pub(crate) fn evict_if_expired(&mut self, table: Table, key: &str, now: OffsetDateTime) -> bool {
		let Some(docs) = self.0.get_mut(&table) else {
			return false;
		};

		match docs.entry(key.to_owned()) {
			Entry::Occupied(entry) if entry.get().is_expired(now) => {
				entry.remove();

				true
			},
			_ => false,
		}
	}

	pub(crate) fn purge_expired(&mut self, now: OffsetDateTime) -> usize {
		let mut purged = 0;

		for docs in self.0.values_mut() {
			let before = docs.len();

			docs.retain(|_, doc| !doc.is_expired(now));

			purged += before - docs.len();
		}

		self.0.retain(|_, docs| !docs.is_empty());

		purged
	}

	/// Checks every precondition in `batch`, then applies all of its mutations.
	///
	/// Preconditions are evaluated against the state produced by earlier operations in the same
	/// batch. Nothing is mutated when any precondition fails.
	pub(crate) fn apply(&mut self, batch: WriteBatch, now: OffsetDateTime) -> CommitOutcome {
		let mut staged =
			Staged { base: self, now, writes: HashMap::new(), truncated: BTreeSet::new() };

		for op in batch.ops() {
			if let Some((table, key)) = staged.check(op) {
				return CommitOutcome::Conflict { table, key: key.to_owned() };
			}
		}

		for op in batch.ops {
			match op {
				WriteOp::Insert { table, key, document } | WriteOp::Put { table, key, document } => {
					self.0.entry(table).or_default().insert(key, document);
				},
				WriteOp::Remove { table, key } =>
					if let Some(docs) = self.0.get_mut(&table) {
						docs.remove(&key);
					},
				WriteOp::Truncate { table } => {
					self.0.remove(&table);
				},
				WriteOp::ExpectAbsent { .. }
				| WriteOp::ExpectPresent { .. }
				| WriteOp::ExpectEquals { .. } => {},
			}
		}

		CommitOutcome::Committed
	}
}

impl Serialize for Tables {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_map(self.0.iter().map(|(table, docs)| (table.as_str(), docs)))
	}
}
impl<'de> Deserialize<'de> for Tables {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = BTreeMap::<String, BTreeMap<String, Document>>::deserialize(deserializer)?;

		raw.into_iter()
			.map(|(name, docs)| {
				Table::from_name(&name)
					.map(|table| (table, docs))
					.ok_or_else(|| D::Error::custom(format!("unknown table `{name}`")))
			})
			.collect::<Result<_, _>>()
			.map(Self)
	}
}

/// Overlay of a batch's pending writes on top of committed state.
struct Staged<'a> {
	base: &'a Tables,
	now: OffsetDateTime,
	writes: HashMap<(Table, &'a str), Option<&'a Document>>,
	truncated: BTreeSet<Table>,
}
impl<'a> Staged<'a> {
	fn current(&self, table: Table, key: &'a str) -> Option<&'a Document> {
		if let Some(staged) = self.writes.get(&(table, key)) {
			return *staged;
		}
		if self.truncated.contains(&table) {
			return None;
		}

		self.base.get(table, key, self.now)
	}

	/// Stages `op`, returning the conflicting table and key when its precondition fails.
	fn check(&mut self, op: &'a WriteOp) -> Option<(Table, &'a str)> {
		match op {
			WriteOp::Insert { table, key, document } => {
				if self.current(*table, key).is_some() {
					return Some((*table, key.as_str()));
				}

				self.writes.insert((*table, key.as_str()), Some(document));
			},
			WriteOp::Put { table, key, document } => {
				self.writes.insert((*table, key.as_str()), Some(document));
			},
			WriteOp::Remove { table, key } => {
				self.writes.insert((*table, key.as_str()), None);
			},
			WriteOp::ExpectAbsent { table, key } =>
				if self.current(*table, key).is_some() {
					return Some((*table, key.as_str()));
				},
			WriteOp::ExpectPresent { table, key } =>
				if self.current(*table, key).is_none() {
					return Some((*table, key.as_str()));
				},
			WriteOp::ExpectEquals { table, key, body } =>
				if self.current(*table, key).is_none_or(|doc| &doc.body != body) {
					return Some((*table, key.as_str()));
				},
			WriteOp::Truncate { table } => {
				self.writes.retain(|(staged, _), _| staged != table);
				self.truncated.insert(*table);
			},
		}

		None
	}
}
