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

//! Common helpers for the chain integration tests.

#![allow(dead_code)]

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use cinder_chain::replay::BlockReplayer;
use cinder_chain::store::{ChainKVStore, UtxoStore};
use cinder_chain::utxo::UtxoEngine;
use cinder_chain::{
	BlockTxesStorage, ChainConfig, ChainState, Direction, Error, NoopAdapter, NoopRules, Options,
};
use cinder_core::consensus::{COIN, EASY_POW_BITS};
use cinder_core::core::hash::{Hash, Hashed};
use cinder_core::core::transaction::OutPoint;
use cinder_core::core::{Block, BlockHeader, ChainedHeader, Transaction, TxInput, TxOutput};
use cinder_core::genesis;
use cinder_store::Store;

pub fn init_chain() -> ChainState {
	init_chain_with_config(ChainConfig::default())
}

pub fn init_chain_with_config(config: ChainConfig) -> ChainState {
	let _ = env_logger::try_init();
	ChainState::init(
		genesis::genesis_dev(),
		Arc::new(NoopRules),
		Arc::new(NoopAdapter),
		config,
	)
	.unwrap()
}

/// A coinbase with the given output values. The salt keeps coinbases of
/// different blocks distinct.
pub fn coinbase(salt: &[u8], values: &[u64]) -> Transaction {
	Transaction::new(
		1,
		vec![TxInput {
			prev_output: OutPoint::null(),
			script_sig: salt.to_vec(),
			sequence: 0xffff_ffff,
		}],
		values
			.iter()
			.map(|v| TxOutput {
				value: *v,
				script_pubkey: vec![],
			})
			.collect(),
		0,
	)
}

/// A transaction spending the given outputs of an earlier transaction into
/// fresh outputs with the given values.
pub fn spend(prev: &Transaction, indices: &[u32], values: &[u64]) -> Transaction {
	Transaction::new(
		1,
		indices
			.iter()
			.map(|i| TxInput {
				prev_output: OutPoint::new(prev.hash(), *i),
				script_sig: vec![],
				sequence: 0xffff_ffff,
			})
			.collect(),
		values
			.iter()
			.map(|v| TxOutput {
				value: *v,
				script_pubkey: vec![],
			})
			.collect(),
		0,
	)
}

/// Builds a block on the given parent header. A merkle stand-in over the
/// transaction hashes keeps sibling headers distinct.
pub fn block_on(prev: &BlockHeader, transactions: Vec<Transaction>) -> Block {
	let mut bytes = vec![];
	for tx in &transactions {
		bytes.extend_from_slice(tx.hash().as_bytes());
	}
	let merkle_root = Hash::double_sha256(&bytes);
	let header = BlockHeader::new(
		1,
		prev.hash(),
		merkle_root,
		prev.time + 600,
		EASY_POW_BITS,
		0,
	);
	Block::new(header, transactions)
}

pub fn process(chain: &ChainState, block: &Block) {
	chain
		.process_block(block.clone(), Options::SKIP_POW)
		.unwrap();
}

pub fn one_coin() -> u64 {
	COIN
}

/// A bare engine-level fixture: the key-value store with its block-txes
/// and unspent-set views, no facade in between.
pub struct UtxoFixture {
	pub txes: Arc<dyn BlockTxesStorage>,
	pub utxo: UtxoStore,
}

impl UtxoFixture {
	pub fn new() -> UtxoFixture {
		let _ = env_logger::try_init();
		let db = Store::open();
		let kv = Arc::new(ChainKVStore::new(db.clone()));
		UtxoFixture {
			txes: kv,
			utxo: UtxoStore::new(db),
		}
	}

	/// Stores a block's transactions and chains a header for it at the
	/// given height, without walking a real ancestry.
	pub fn store_block(&self, height: u64, transactions: Vec<Transaction>) -> ChainedHeader {
		let block = block_on(
			&BlockHeader::new(1, Hash::double_sha256(&height.to_be_bytes()), Hash::from_vec(&[]), 1_500_000_000, EASY_POW_BITS, height as u32),
			transactions,
		);
		self.txes
			.try_add_block_transactions(block.hash(), &block.transactions)
			.unwrap();
		ChainedHeader::new(block.header.clone(), height, Default::default())
	}

	/// Runs one replay step straight through the engine, committing on
	/// success.
	pub fn replay(
		&self,
		header: &ChainedHeader,
		direction: Direction,
		duplicate_coinbases: &[(u64, Hash)],
	) -> Result<(), Error> {
		let replayer = BlockReplayer::new(self.txes.clone(), self.utxo.clone());
		let cancel = Arc::new(AtomicBool::new(false));
		let stream = replayer.replay_block(header, direction, cancel)?;
		let mut cursor = self.utxo.cursor();
		let result = (|| {
			let mut engine = UtxoEngine::new(&mut cursor, header, direction, duplicate_coinbases)?;
			for item in stream {
				engine.apply(&item?)?;
			}
			engine.finish()
		})();
		match result {
			Ok(()) => cursor.commit(),
			Err(e) => {
				cursor.rollback();
				Err(e)
			}
		}
	}

	pub fn connect(&self, header: &ChainedHeader) -> Result<(), Error> {
		self.replay(header, Direction::Forward, &[])
	}

	pub fn disconnect(&self, header: &ChainedHeader) -> Result<(), Error> {
		self.replay(header, Direction::Reverse, &[])
	}

	pub fn counters(&self) -> (u64, u64, u64, u64, u64) {
		(
			self.utxo.counter("unspent_tx_count").unwrap(),
			self.utxo.counter("unspent_output_count").unwrap(),
			self.utxo.counter("total_tx_count").unwrap(),
			self.utxo.counter("total_input_count").unwrap(),
			self.utxo.counter("total_output_count").unwrap(),
		)
	}
}
