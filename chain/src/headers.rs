// Copyright 2019 The Cinder Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The append-only graph of chained headers: chains incoming headers onto
//! known parents, tracks cumulative work, selects the best tip and carries
//! consensus-invalidation marks down to descendants.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use lru_cache::LruCache;

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{BlockHeader, Chain, ChainedHeader};
use crate::error::{Error, ErrorKind};
use crate::types::BlockStorage;
use util::{Mutex, RwLock};

/// Bound on the cache of lookups known to have missed, so repeated queries
/// for unknown hashes don't repeatedly hit storage.
const MISS_CACHE_SIZE: usize = 10_000;

/// Shard count for the miss cache locks, keyed by the low bits of the hash.
const MISS_CACHE_SHARDS: usize = 64;

/// A callback fired after a graph state change has been committed. Handlers
/// must not re-enter the graph.
pub type HeaderHandler = Box<dyn Fn(&ChainedHeader) + Send + Sync>;

// Negative-lookup cache sharded across independently locked slices so
// concurrent readers rarely contend.
struct MissCache {
	shards: Vec<Mutex<LruCache<Hash, ()>>>,
}

impl MissCache {
	fn new() -> MissCache {
		MissCache {
			shards: (0..MISS_CACHE_SHARDS)
				.map(|_| Mutex::new(LruCache::new(MISS_CACHE_SIZE / MISS_CACHE_SHARDS)))
				.collect(),
		}
	}

	fn shard(&self, hash: &Hash) -> &Mutex<LruCache<Hash, ()>> {
		&self.shards[(hash.0[31] as usize) % MISS_CACHE_SHARDS]
	}

	fn contains(&self, hash: &Hash) -> bool {
		self.shard(hash).lock().contains_key(hash)
	}

	fn insert(&self, hash: Hash) {
		self.shard(&hash).lock().insert(hash, ());
	}

	fn remove(&self, hash: &Hash) {
		self.shard(hash).lock().remove(hash);
	}
}

struct GraphInner {
	headers: HashMap<Hash, ChainedHeader>,
	// index of parent hash to children, to carry invalidation marks down
	children: HashMap<Hash, Vec<Hash>>,
	invalid: HashSet<Hash>,
	genesis: Option<Hash>,
}

/// The header-chaining graph. Safe for many concurrent readers; writers
/// serialize on a single mutation lock.
pub struct HeaderGraph {
	store: Arc<dyn BlockStorage>,
	inner: RwLock<GraphInner>,
	write_lock: Mutex<()>,
	miss_cache: MissCache,
	added_handlers: RwLock<Vec<HeaderHandler>>,
	invalidated_handlers: RwLock<Vec<HeaderHandler>>,
}

impl HeaderGraph {
	/// Builds the graph from everything the block storage already holds.
	pub fn init(store: Arc<dyn BlockStorage>) -> Result<HeaderGraph, Error> {
		let mut inner = GraphInner {
			headers: HashMap::new(),
			children: HashMap::new(),
			invalid: HashSet::new(),
			genesis: None,
		};
		for header in store.read_chained_headers()? {
			let hash = header.hash();
			if store.is_block_invalid(&hash)? {
				inner.invalid.insert(hash);
			}
			if header.height == 0 {
				inner.genesis = Some(hash);
			}
			inner
				.children
				.entry(header.header.prev)
				.or_insert_with(Vec::new)
				.push(hash);
			inner.headers.insert(hash, header);
		}
		debug!(
			"header graph init: {} headers, {} invalid",
			inner.headers.len(),
			inner.invalid.len()
		);
		Ok(HeaderGraph {
			store,
			inner: RwLock::new(inner),
			write_lock: Mutex::new(()),
			miss_cache: MissCache::new(),
			added_handlers: RwLock::new(vec![]),
			invalidated_handlers: RwLock::new(vec![]),
		})
	}

	/// Whether the graph holds no headers at all.
	pub fn is_empty(&self) -> bool {
		self.inner.read().headers.is_empty()
	}

	/// Inserts the header at height 0. Fails if a distinct genesis is
	/// already present; re-submitting the same genesis returns the existing
	/// entry.
	pub fn add_genesis(&self, header: BlockHeader) -> Result<ChainedHeader, Error> {
		let _w = self.write_lock.lock();
		let hash = header.hash();
		{
			let inner = self.inner.read();
			if let Some(genesis_hash) = inner.genesis {
				if genesis_hash == hash {
					return Ok(inner.headers[&genesis_hash].clone());
				}
				return Err(ErrorKind::GenesisMismatch.into());
			}
		}
		let chained = ChainedHeader::genesis(header)
			.ok_or_else(|| ErrorKind::Unfit("unusable genesis target bits".to_string()))?;
		self.store.try_add_chained_header(&chained)?;
		{
			let mut inner = self.inner.write();
			inner.genesis = Some(hash);
			inner.headers.insert(hash, chained.clone());
		}
		self.miss_cache.remove(&hash);
		self.fire(&self.added_handlers, &chained);
		Ok(chained)
	}

	/// Chains a header onto a known parent. Returns None when the parent is
	/// unknown or the header's target bits are unusable. Idempotent:
	/// re-submitting an already-present header returns the existing entry
	/// without firing events, invalid marks included.
	pub fn try_chain(&self, header: BlockHeader) -> Result<Option<ChainedHeader>, Error> {
		let _w = self.write_lock.lock();
		let hash = header.hash();
		if let Some(existing) = self.get(&hash)? {
			return Ok(Some(existing));
		}
		let parent = match self.get(&header.prev)? {
			Some(parent) => parent,
			None => return Ok(None),
		};
		let chained = match ChainedHeader::from_parent(header, &parent) {
			Some(chained) => chained,
			None => return Ok(None),
		};
		self.store.try_add_chained_header(&chained)?;
		let parent_invalid = {
			let mut inner = self.inner.write();
			inner
				.children
				.entry(chained.header.prev)
				.or_insert_with(Vec::new)
				.push(hash);
			inner.headers.insert(hash, chained.clone());
			if inner.invalid.contains(&chained.header.prev) {
				// a child of an invalid header is invalid from birth
				inner.invalid.insert(hash);
				true
			} else {
				false
			}
		};
		if parent_invalid {
			self.store.mark_block_invalid(&hash)?;
		}
		self.miss_cache.remove(&hash);
		self.fire(&self.added_handlers, &chained);
		Ok(Some(chained))
	}

	/// Looks a chained header up by hash, consulting memory first, then
	/// storage unless the hash is known to miss.
	pub fn get(&self, hash: &Hash) -> Result<Option<ChainedHeader>, Error> {
		{
			let inner = self.inner.read();
			if let Some(header) = inner.headers.get(hash) {
				return Ok(Some(header.clone()));
			}
		}
		if self.miss_cache.contains(hash) {
			return Ok(None);
		}
		match self.store.try_get_chained_header(hash)? {
			Some(header) => {
				let mut inner = self.inner.write();
				inner
					.children
					.entry(header.header.prev)
					.or_insert_with(Vec::new)
					.push(*hash);
				inner.headers.insert(*hash, header.clone());
				Ok(Some(header))
			}
			None => {
				self.miss_cache.insert(*hash);
				Ok(None)
			}
		}
	}

	/// Whether the graph knows the given header.
	pub fn contains(&self, hash: &Hash) -> Result<bool, Error> {
		Ok(self.get(hash)?.is_some())
	}

	/// The valid header carrying the most cumulative work, ties broken by
	/// lowest hash. None when the graph is empty or fully invalidated.
	pub fn max_total_work_tip(&self) -> Option<ChainedHeader> {
		let inner = self.inner.read();
		let mut best: Option<&ChainedHeader> = None;
		for (hash, header) in &inner.headers {
			if inner.invalid.contains(hash) {
				continue;
			}
			best = match best {
				None => Some(header),
				Some(current) => {
					if header.total_work > current.total_work
						|| (header.total_work == current.total_work
							&& header.hash() < current.hash())
					{
						Some(header)
					} else {
						Some(current)
					}
				}
			};
		}
		best.cloned()
	}

	/// Marks a header and all its descendants as consensus-invalid,
	/// excluding them from tip selection. Marks persist across restarts.
	pub fn mark_invalid(&self, hash: &Hash) -> Result<(), Error> {
		let _w = self.write_lock.lock();
		let mut newly_invalid = Vec::new();
		{
			let mut guard = self.inner.write();
			let inner = &mut *guard;
			if !inner.headers.contains_key(hash) {
				warn!("mark_invalid: unknown header {}", hash);
				return Ok(());
			}
			let mut queue = vec![*hash];
			while let Some(current) = queue.pop() {
				if inner.invalid.insert(current) {
					newly_invalid.push(inner.headers[&current].clone());
					if let Some(children) = inner.children.get(&current) {
						queue.extend(children.iter().cloned());
					}
				}
			}
		}
		for header in &newly_invalid {
			self.store.mark_block_invalid(&header.hash())?;
		}
		for header in &newly_invalid {
			self.fire(&self.invalidated_handlers, header);
		}
		Ok(())
	}

	/// Whether a header has been marked consensus-invalid.
	pub fn is_invalid(&self, hash: &Hash) -> bool {
		self.inner.read().invalid.contains(hash)
	}

	/// Registers a handler fired after each newly chained header.
	pub fn on_chained_header_added(&self, handler: HeaderHandler) {
		self.added_handlers.write().push(handler);
	}

	/// Registers a handler fired after each newly invalidated header.
	pub fn on_invalidated(&self, handler: HeaderHandler) {
		self.invalidated_handlers.write().push(handler);
	}

	/// Builds the full chain from genesis to the given tip by walking the
	/// ancestry backwards.
	pub fn chain_to(&self, tip_hash: &Hash) -> Result<Chain, Error> {
		let inner = self.inner.read();
		let mut headers = Vec::new();
		let mut current = inner
			.headers
			.get(tip_hash)
			.ok_or_else(|| ErrorKind::Corruption(format!("unknown tip {}", tip_hash)))?;
		loop {
			headers.push(current.clone());
			if current.height == 0 {
				break;
			}
			current = inner.headers.get(&current.header.prev).ok_or_else(|| {
				ErrorKind::Corruption(format!(
					"broken ancestry below {} at {}",
					current.hash(),
					current.height
				))
			})?;
		}
		headers.reverse();
		Chain::from_headers(headers)
			.ok_or_else(|| ErrorKind::Corruption("inconsistent header ancestry".to_string()).into())
	}

	// handlers run outside all graph locks, after the state change landed
	fn fire(&self, handlers: &RwLock<Vec<HeaderHandler>>, header: &ChainedHeader) {
		let handlers = handlers.read();
		for handler in handlers.iter() {
			handler(header);
		}
	}
}
