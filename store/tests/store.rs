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

use cinder_store::{to_key, Store};

#[test]
fn batch_commit_is_atomic() {
	let store = Store::open();
	{
		let mut batch = store.batch().unwrap();
		batch.put_ser(b"a", &1u64).unwrap();
		batch.put_ser(b"b", &2u64).unwrap();

		// nothing visible to readers before commit
		assert_eq!(store.get_ser::<u64>(b"a").unwrap(), None);
		// but visible through the batch itself
		assert_eq!(batch.get_ser::<u64>(b"a").unwrap(), Some(1));

		batch.commit().unwrap();
	}
	assert_eq!(store.get_ser::<u64>(b"a").unwrap(), Some(1));
	assert_eq!(store.get_ser::<u64>(b"b").unwrap(), Some(2));
}

#[test]
fn dropping_a_batch_rolls_back() {
	let store = Store::open();
	{
		let mut batch = store.batch().unwrap();
		batch.put_ser(b"a", &1u64).unwrap();
		// dropped without commit
	}
	assert_eq!(store.get_ser::<u64>(b"a").unwrap(), None);

	// the write slot was released, a new batch can proceed
	let mut batch = store.batch().unwrap();
	batch.put_ser(b"a", &7u64).unwrap();
	batch.commit().unwrap();
	assert_eq!(store.get_ser::<u64>(b"a").unwrap(), Some(7));
}

#[test]
fn batch_delete_overlays_reads() {
	let store = Store::open();
	let mut batch = store.batch().unwrap();
	batch.put_ser(b"k", &42u64).unwrap();
	batch.commit().unwrap();

	let mut batch = store.batch().unwrap();
	batch.delete(b"k").unwrap();
	assert_eq!(batch.get_ser::<u64>(b"k").unwrap(), None);
	// still visible to plain readers until commit
	assert_eq!(store.get_ser::<u64>(b"k").unwrap(), Some(42));
	batch.commit().unwrap();
	assert_eq!(store.get_ser::<u64>(b"k").unwrap(), None);
}

#[test]
fn prefix_iteration() {
	let store = Store::open();
	let mut batch = store.batch().unwrap();
	for i in 0..5u64 {
		let key = to_key(b'x', &mut vec![i as u8]);
		batch.put_ser(&key, &i).unwrap();
	}
	batch.put_ser(&to_key(b'y', &mut vec![0]), &99u64).unwrap();
	batch.commit().unwrap();

	let prefix = to_key(b'x', &mut vec![]);
	let values: Vec<u64> = store.iter::<u64>(&prefix).unwrap().map(|(_, v)| v).collect();
	assert_eq!(values, vec![0, 1, 2, 3, 4]);
}
