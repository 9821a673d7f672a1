// Copyright 2018 The Cinder Developers
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

//! Storage of core types in a process-local transactional key-value map.
//! All writes go through a Batch abstraction providing atomicity: an owned
//! exclusive write transaction whose mutations become visible to readers
//! all at once on commit, and not at all when dropped.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate failure_derive;

extern crate cinder_core as core;
extern crate cinder_util as util;

pub mod pool;

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::vec;

use byteorder::{BigEndian, WriteBytesExt};

use crate::core::ser;
use util::{Condvar, Mutex, RwLock};

const SEP: u8 = b':';

/// Main error type for this crate.
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum Error {
	/// Couldn't find what we were looking for
	#[fail(display = "DB Not Found Error: {}", _0)]
	NotFoundErr(String),
	/// Wraps a serialization error for Writeable or Readable
	#[fail(display = "Serialization Error: {}", _0)]
	SerErr(String),
	/// A pooled resource didn't free up within the allotted time
	#[fail(display = "Timed out waiting for a pooled resource")]
	Timeout,
	/// Anything else
	#[fail(display = "Other Error: {}", _0)]
	OtherErr(String),
}

/// unwraps the inner option by converting the none case to a not found error
pub fn option_to_not_found<T>(res: Result<Option<T>, Error>, field_name: &str) -> Result<T, Error> {
	match res {
		Ok(None) => Err(Error::NotFoundErr(field_name.to_owned())),
		Ok(Some(o)) => Ok(o),
		Err(e) => Err(e),
	}
}

fn deser<T: ser::Readable>(bytes: &[u8]) -> Result<T, Error> {
	ser::deserialize(&mut &bytes[..]).map_err(|e| Error::SerErr(format!("{}", e)))
}

struct StoreInner {
	map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
	// a single write transaction may be in flight at any time
	busy: Mutex<bool>,
	freed: Condvar,
}

impl StoreInner {
	fn release(&self) {
		let mut busy = self.busy.lock();
		*busy = false;
		self.freed.notify_one();
	}
}

/// Store facilitating data access and serialization. All writes are done
/// through a Batch abstraction providing atomicity.
#[derive(Clone)]
pub struct Store {
	inner: Arc<StoreInner>,
}

impl Store {
	/// Creates a new, empty store.
	pub fn open() -> Store {
		Store {
			inner: Arc::new(StoreInner {
				map: RwLock::new(BTreeMap::new()),
				busy: Mutex::new(false),
				freed: Condvar::new(),
			}),
		}
	}

	/// Gets a value from the db, provided its key
	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
		let map = self.inner.map.read();
		Ok(map.get(key).cloned())
	}

	/// Gets a `Readable` value from the db, provided its key. Encapsulates
	/// serialization.
	pub fn get_ser<T: ser::Readable>(&self, key: &[u8]) -> Result<Option<T>, Error> {
		match self.get(key)? {
			Some(bytes) => Ok(Some(deser(&bytes)?)),
			None => Ok(None),
		}
	}

	/// Whether the provided key exists
	pub fn exists(&self, key: &[u8]) -> Result<bool, Error> {
		let map = self.inner.map.read();
		Ok(map.contains_key(key))
	}

	/// Produces an iterator of `Readable` types moving forward from the
	/// provided key, restricted to keys sharing its prefix. The iterator
	/// operates on a snapshot taken when it is built.
	pub fn iter<T: ser::Readable>(&self, from: &[u8]) -> Result<SerIterator<T>, Error> {
		let snapshot: Vec<(Vec<u8>, Vec<u8>)> = {
			let map = self.inner.map.read();
			map.range(from.to_vec()..)
				.take_while(|(k, _)| k.starts_with(from))
				.map(|(k, v)| (k.clone(), v.clone()))
				.collect()
		};
		Ok(SerIterator {
			items: snapshot.into_iter(),
			_marker: PhantomData,
		})
	}

	/// Builds a new batch to be used with this store. Blocks until any
	/// previous batch has been committed or dropped: only one write
	/// transaction is in flight at a time.
	pub fn batch(&self) -> Result<Batch, Error> {
		{
			let mut busy = self.inner.busy.lock();
			while *busy {
				self.inner.freed.wait(&mut busy);
			}
			*busy = true;
		}
		Ok(Batch {
			inner: self.inner.clone(),
			pending: BTreeMap::new(),
			finished: false,
		})
	}
}

/// Batch to write multiple Writeables to the db in an atomic manner. Holds
/// the store's single write slot for as long as it lives; dropping the batch
/// without committing discards all of its writes.
pub struct Batch {
	inner: Arc<StoreInner>,
	pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
	finished: bool,
}

impl Batch {
	/// Writes a single key/value pair to the batch
	pub fn put(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), Error> {
		self.pending.insert(key.to_vec(), Some(value));
		Ok(())
	}

	/// Writes a single key and its `Writeable` value to the batch.
	/// Encapsulates serialization.
	pub fn put_ser<W: ser::Writeable>(&mut self, key: &[u8], value: &W) -> Result<(), Error> {
		let ser_value = ser::ser_vec(value).map_err(|e| Error::SerErr(format!("{}", e)))?;
		self.put(key, ser_value)
	}

	/// Gets a value from the db, taking the content of the batch into
	/// account.
	pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
		if let Some(pending) = self.pending.get(key) {
			return Ok(pending.clone());
		}
		let map = self.inner.map.read();
		Ok(map.get(key).cloned())
	}

	/// Gets a `Readable` value from the db, provided its key, taking the
	/// content of the current batch into account.
	pub fn get_ser<T: ser::Readable>(&self, key: &[u8]) -> Result<Option<T>, Error> {
		match self.get(key)? {
			Some(bytes) => Ok(Some(deser(&bytes)?)),
			None => Ok(None),
		}
	}

	/// Whether the provided key exists, taking the content of the batch
	/// into account.
	pub fn exists(&self, key: &[u8]) -> Result<bool, Error> {
		Ok(self.get(key)?.is_some())
	}

	/// Deletes a key/value pair from the batch
	pub fn delete(&mut self, key: &[u8]) -> Result<(), Error> {
		self.pending.insert(key.to_vec(), None);
		Ok(())
	}

	/// Writes the batch to the db. All of its mutations become visible to
	/// readers at once.
	pub fn commit(mut self) -> Result<(), Error> {
		{
			let mut map = self.inner.map.write();
			for (key, value) in std::mem::replace(&mut self.pending, BTreeMap::new()) {
				match value {
					Some(v) => {
						map.insert(key, v);
					}
					None => {
						map.remove(&key);
					}
				}
			}
		}
		self.finished = true;
		self.inner.release();
		Ok(())
	}
}

impl Drop for Batch {
	fn drop(&mut self) {
		if !self.finished {
			// implicit rollback, pending writes are simply discarded
			self.inner.release();
		}
	}
}

/// An iterator that produces Readable instances back, along with their key.
/// Wraps a snapshot of the underlying map and deserializes the returned
/// values.
pub struct SerIterator<T>
where
	T: ser::Readable,
{
	items: vec::IntoIter<(Vec<u8>, Vec<u8>)>,
	_marker: PhantomData<T>,
}

impl<T> Iterator for SerIterator<T>
where
	T: ser::Readable,
{
	type Item = (Vec<u8>, T);

	fn next(&mut self) -> Option<(Vec<u8>, T)> {
		while let Some((key, value)) = self.items.next() {
			if let Ok(item) = deser(&value) {
				return Some((key, item));
			}
		}
		None
	}
}

/// Build a db key from a prefix and a byte vector identifier.
pub fn to_key(prefix: u8, k: &mut Vec<u8>) -> Vec<u8> {
	let mut res = Vec::with_capacity(k.len() + 2);
	res.push(prefix);
	res.push(SEP);
	res.append(k);
	res
}

/// Build a db key from a prefix, a byte vector identifier and a numeric
/// identifier.
pub fn to_key_u64(prefix: u8, k: &mut Vec<u8>, val: u64) -> Vec<u8> {
	let mut res = to_key(prefix, k);
	res.write_u64::<BigEndian>(val).expect("write to vec");
	res
}

/// Build a db key from a prefix and a numeric identifier.
pub fn u64_to_key(prefix: u8, val: u64) -> Vec<u8> {
	let mut u64_vec = vec![];
	u64_vec.write_u64::<BigEndian>(val).expect("write to vec");
	u64_vec.insert(0, SEP);
	u64_vec.insert(0, prefix);
	u64_vec
}
