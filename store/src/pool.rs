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

//! A bounded pool of reusable expensive resources, typically storage
//! cursors. Taking an item pops a cached instance or builds a fresh one via
//! the configured factory; when neither is possible the caller blocks on the
//! item-freed signal up to a timeout. Only caching is bounded: items
//! returned above capacity are disposed of instead.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Error;
use util::{Condvar, Mutex};

/// Builds a fresh poolable item when the pool is empty.
pub type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Runs against every item returned to the pool, restoring it to a
/// take-ready state (e.g. resetting a cursor).
pub type Prepare<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct PoolInner<T> {
	capacity: usize,
	items: Mutex<Vec<T>>,
	freed: Condvar,
	factory: Option<Factory<T>>,
	prepare: Option<Prepare<T>>,
}

/// A bounded pool of reusable items.
pub struct Pool<T> {
	inner: Arc<PoolInner<T>>,
}

impl<T> Clone for Pool<T> {
	fn clone(&self) -> Pool<T> {
		Pool {
			inner: self.inner.clone(),
		}
	}
}

impl<T: Send> Pool<T> {
	/// Creates a pool caching at most `capacity` idle items.
	pub fn new(capacity: usize, factory: Option<Factory<T>>, prepare: Option<Prepare<T>>) -> Pool<T> {
		Pool {
			inner: Arc::new(PoolInner {
				capacity,
				items: Mutex::new(Vec::with_capacity(capacity)),
				freed: Condvar::new(),
				factory,
				prepare,
			}),
		}
	}

	/// Takes an item out of the pool. Pops a cached instance when one is
	/// available, otherwise builds one via the factory. With no factory
	/// configured, blocks on the item-freed signal up to the given timeout.
	pub fn take(&self, timeout: Duration) -> Result<PoolItem<T>, Error> {
		let deadline = Instant::now() + timeout;
		let mut items = self.inner.items.lock();
		loop {
			if let Some(item) = items.pop() {
				return Ok(PoolItem {
					item: Some(item),
					inner: self.inner.clone(),
				});
			}
			if let Some(ref factory) = self.inner.factory {
				// opportunistic creation, allowed even above capacity
				drop(items);
				return Ok(PoolItem {
					item: Some(factory()),
					inner: self.inner.clone(),
				});
			}
			let now = Instant::now();
			if now >= deadline {
				return Err(Error::Timeout);
			}
			let wait = self.inner.freed.wait_for(&mut items, deadline - now);
			if wait.timed_out() && items.is_empty() {
				return Err(Error::Timeout);
			}
		}
	}

	/// Hands an idle item to the pool directly, for pools without a
	/// factory. Disposed of when the pool is already at capacity.
	pub fn seed(&self, item: T) {
		let mut items = self.inner.items.lock();
		if items.len() < self.inner.capacity {
			items.push(item);
			self.inner.freed.notify_one();
		}
	}

	/// Number of idle items currently cached. Never exceeds the capacity.
	pub fn cached(&self) -> usize {
		self.inner.items.lock().len()
	}
}

/// An item on loan from a Pool. Returns itself to the pool when dropped,
/// running the prepare hook first; if the pool is already at capacity the
/// item is disposed of instead of cached.
pub struct PoolItem<T: Send> {
	item: Option<T>,
	inner: Arc<PoolInner<T>>,
}

impl<T: Send> Deref for PoolItem<T> {
	type Target = T;

	fn deref(&self) -> &T {
		self.item.as_ref().expect("pool item already returned")
	}
}

impl<T: Send> DerefMut for PoolItem<T> {
	fn deref_mut(&mut self) -> &mut T {
		self.item.as_mut().expect("pool item already returned")
	}
}

impl<T: Send> Drop for PoolItem<T> {
	fn drop(&mut self) {
		if let Some(mut item) = self.item.take() {
			if let Some(ref prepare) = self.inner.prepare {
				prepare(&mut item);
			}
			let mut items = self.inner.items.lock();
			if items.len() < self.inner.capacity {
				items.push(item);
				self.inner.freed.notify_one();
			}
			// items above capacity fall out of scope here and are disposed
		}
	}
}
