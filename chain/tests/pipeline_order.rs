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

mod chain_test_helper;

use std::sync::{Arc, Mutex};

use chain_test_helper::*;
use cinder_chain::wallet::{ChannelSink, ReplaySink};
use cinder_chain::{Direction, Error, ValidatableTx};
use cinder_core::core::hash::{Hash, Hashed};
use cinder_core::core::Transaction;

struct RecordingSink {
	seen: Arc<Mutex<Vec<(Hash, u32)>>>,
}

impl ReplaySink for RecordingSink {
	fn name(&self) -> &str {
		"recording"
	}

	fn process(&mut self, _direction: Direction, tx: Arc<ValidatableTx>) -> Result<(), Error> {
		self.seen
			.lock()
			.unwrap()
			.push((tx.block_hash, tx.loaded.tx_index));
		// stall a little so back-pressure actually gets exercised
		std::thread::sleep(std::time::Duration::from_millis(1));
		Ok(())
	}
}

/// A block whose transactions chain into each other, so ordering mistakes
/// would also break replay itself.
fn chained_tx_block(chain: &cinder_chain::ChainState, count: usize) -> cinder_core::core::Block {
	let genesis = chain.current_chain().tip().header.clone();
	let mut txs: Vec<Transaction> = vec![coinbase(b"ordered", &[50 * one_coin()])];
	for i in 1..count {
		let prev = txs[i - 1].clone();
		txs.push(spend(&prev, &[0], &[50 * one_coin() - i as u64]));
	}
	block_on(&genesis, txs)
}

#[test]
fn sinks_see_transactions_in_block_order() {
	let chain = init_chain();
	let seen = Arc::new(Mutex::new(vec![]));
	chain.register_sink(Box::new(RecordingSink { seen: seen.clone() }));

	let block = chained_tx_block(&chain, 24);
	process(&chain, &block);
	assert_eq!(chain.tip().height, 1);

	let seen = seen.lock().unwrap();
	let indices: Vec<u32> = seen
		.iter()
		.filter(|(hash, _)| *hash == block.hash())
		.map(|(_, index)| *index)
		.collect();
	assert_eq!(indices, (0..24).collect::<Vec<u32>>());
}

#[test]
fn wallet_channel_receives_the_ordered_stream() {
	let chain = init_chain();
	let (sink, receiver) = ChannelSink::new("wallet", 64);
	chain.register_sink(Box::new(sink));

	let block = chained_tx_block(&chain, 8);
	process(&chain, &block);

	let mut indices = vec![];
	while let Ok((direction, tx)) = receiver.try_recv() {
		assert_eq!(direction, Direction::Forward);
		if tx.block_hash == block.hash() {
			assert_eq!(tx.height, 1);
			indices.push(tx.loaded.tx_index);
		}
	}
	assert_eq!(indices, (0..8).collect::<Vec<u32>>());
}

#[test]
fn a_failing_sink_aborts_the_step() {
	struct FailingSink;
	impl ReplaySink for FailingSink {
		fn name(&self) -> &str {
			"failing"
		}
		fn process(&mut self, _d: Direction, tx: Arc<ValidatableTx>) -> Result<(), Error> {
			if tx.loaded.tx_index >= 3 {
				return Err(cinder_chain::ErrorKind::Other("sink gave up".to_string()).into());
			}
			Ok(())
		}
	}

	let chain = init_chain();
	chain.register_sink(Box::new(FailingSink));
	let block = chained_tx_block(&chain, 8);
	let err = chain
		.process_block(block.clone(), cinder_chain::Options::SKIP_POW)
		.err()
		.unwrap();
	assert_eq!(
		err.kind(),
		cinder_chain::ErrorKind::Other("sink gave up".to_string())
	);

	// the cursor was rolled back, nothing of the block landed
	assert_eq!(chain.tip().height, 0);
	assert_eq!(chain.unspent_tx_count().unwrap(), 0);
	assert!(chain
		.utxo()
		.try_get_unspent_tx(&block.transactions[0].hash())
		.unwrap()
		.is_none());
}
