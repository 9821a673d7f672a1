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

//! Facade and handler for the rest of the chain-state implementation:
//! accepts headers and blocks, drives the walker and replay pipeline to
//! keep the validated chain on the best-work tip, and prunes behind it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::core::hash::{Hash, Hashed};
use crate::core::core::{Block, BlockHeader, Chain, ChainedHeader};
use crate::error::{Error, ErrorKind};
use crate::headers::HeaderGraph;
use crate::pipeline::{self, RulesSink};
use crate::prune::PruningEngine;
use crate::replay::BlockReplayer;
use crate::store::{
	ChainKVStore, UtxoStore, TOTAL_INPUT_COUNT, TOTAL_OUTPUT_COUNT, TOTAL_TX_COUNT,
	UNSPENT_OUTPUT_COUNT, UNSPENT_TX_COUNT,
};
use crate::types::{
	BlockStorage, BlockTxesStorage, ChainAdapter, ChainConfig, Direction, Rules, Tip,
};
use crate::walker::ChainWalker;
use crate::wallet::ReplaySink;
use cinder_store::pool::Pool;
use cinder_store::Store;
use util::Mutex;

bitflags! {
	/// Options for header and block processing
	pub struct Options: u32 {
		/// No flags
		const NONE = 0b0000_0000;
		/// Runs without checking the proof of work, mostly to make testing
		/// easier
		const SKIP_POW = 0b0000_0001;
		/// Block came from a trusted sync source, skip structural checks
		const SYNC = 0b0000_0010;
	}
}

/// Facade to the chain-state engine. Provides the current view of the
/// unspent set according to the validated chain, and maintains locking so
/// a single worker drives replay at a time.
pub struct ChainState {
	blocks: Arc<dyn BlockStorage>,
	txes: Arc<dyn BlockTxesStorage>,
	utxo: UtxoStore,
	graph: Arc<HeaderGraph>,
	rules: Arc<dyn Rules>,
	adapter: Arc<dyn ChainAdapter>,
	config: ChainConfig,

	current: Mutex<Chain>,
	// serializes head updates, the single replay worker at a time
	head_lock: Mutex<()>,
	cursor_pool: Pool<UtxoCursorHandle>,
	sinks: Mutex<Vec<Box<dyn ReplaySink>>>,
	cancel: Arc<AtomicBool>,
	pruner: PruningEngine,
}

// the pool stores cursors; a thin alias keeps signatures readable
type UtxoCursorHandle = crate::store::UtxoCursor;

impl ChainState {
	/// Initializes the chain state over a fresh in-process store and makes
	/// sure the genesis block is chained and applied.
	pub fn init(
		genesis: Block,
		rules: Arc<dyn Rules>,
		adapter: Arc<dyn ChainAdapter>,
		config: ChainConfig,
	) -> Result<ChainState, Error> {
		let db = Store::open();
		ChainState::init_with_store(db, genesis, rules, adapter, config)
	}

	/// Initializes the chain state over an existing store, picking up
	/// whatever chain it already holds.
	pub fn init_with_store(
		db: Store,
		genesis: Block,
		rules: Arc<dyn Rules>,
		adapter: Arc<dyn ChainAdapter>,
		config: ChainConfig,
	) -> Result<ChainState, Error> {
		let kv = Arc::new(ChainKVStore::new(db.clone()));
		let blocks: Arc<dyn BlockStorage> = kv.clone();
		let txes: Arc<dyn BlockTxesStorage> = kv;
		let utxo = UtxoStore::new(db);
		let graph = Arc::new(HeaderGraph::init(blocks.clone())?);

		let genesis_hash = genesis.hash();
		let chained_genesis = graph.add_genesis(genesis.header.clone())?;
		txes.try_add_block_transactions(genesis_hash, &genesis.transactions)?;

		let current = match utxo.validated_tip()? {
			Some(tip) => graph.chain_to(&tip.last_block_h)?,
			None => Chain::from_genesis(chained_genesis.clone()).ok_or_else(|| {
				ErrorKind::Corruption("genesis header is not at height 0".to_string())
			})?,
		};

		let pool_factory = {
			let utxo = utxo.clone();
			move || utxo.cursor()
		};
		let cursor_pool = Pool::new(
			config.cursor_pool_capacity,
			Some(Box::new(pool_factory)),
			Some(Box::new(|cursor: &mut UtxoCursorHandle| cursor.reset())),
		);
		let pruner = PruningEngine::new(
			utxo.clone(),
			txes.clone(),
			config.prune_mode,
			config.safety_buffer,
		);

		let state = ChainState {
			blocks,
			txes,
			utxo,
			graph,
			rules: rules.clone(),
			adapter,
			config,
			current: Mutex::new(current),
			head_lock: Mutex::new(()),
			cursor_pool,
			sinks: Mutex::new(vec![Box::new(RulesSink::new(rules)) as Box<dyn ReplaySink>]),
			cancel: Arc::new(AtomicBool::new(false)),
			pruner,
		};

		if state.utxo.validated_tip()?.is_none() {
			// apply the genesis block: excluded from the unspent set but
			// establishing the validated tip
			let tip = Tip::from_header(&chained_genesis);
			state.replay_step(&chained_genesis, Direction::Forward, &tip)?;
			info!(
				"chain init: applied genesis {} at height 0",
				chained_genesis.hash()
			);
		}
		info!("chain init: tip {:?}", state.tip());
		Ok(state)
	}

	/// Attempt to chain a new header. Returns the chained form, or None if
	/// its parent isn't known yet.
	pub fn process_header(
		&self,
		header: BlockHeader,
		opts: Options,
	) -> Result<Option<ChainedHeader>, Error> {
		if !opts.contains(Options::SKIP_POW) {
			self.rules.check_proof_of_work(&header)?;
		}
		self.graph.try_chain(header)
	}

	/// Attempt to add a new block to the chain. Stores its transactions,
	/// chains its header and drives the validated chain toward the best
	/// tip. Returns the tip if the block chained, None if it's an orphan
	/// for now.
	pub fn process_block(&self, block: Block, opts: Options) -> Result<Option<Tip>, Error> {
		let block_hash = block.hash();
		if !opts.contains(Options::SYNC) {
			self.rules.validate_block_structure(&block)?;
		}
		self.txes
			.try_add_block_transactions(block_hash, &block.transactions)?;
		let chained = self.process_header(block.header.clone(), opts)?;
		if chained.is_none() {
			debug!("process_block: orphan block {}", block_hash);
			return Ok(None);
		}
		let tip = self.update_head()?;
		Ok(Some(tip))
	}

	/// Drives the validated chain toward the max-work tip, disconnecting
	/// and connecting blocks along the walker's path. Validation failures
	/// mark the offending header invalid and re-plan; missing block data
	/// aborts quietly after emitting the missed event. Prunes behind the
	/// tip once done.
	pub fn update_head(&self) -> Result<Tip, Error> {
		let _worker = self.head_lock.lock();
		loop {
			let best = match self.graph.max_total_work_tip() {
				Some(best) => best,
				None => break,
			};
			let current = self.current.lock().clone();
			if best.hash() == current.tip().hash() {
				break;
			}
			let target = self.graph.chain_to(&best.hash())?;
			let steps = ChainWalker::navigate(&current, &target)?;
			if steps.is_empty() {
				break;
			}

			let started = Instant::now();
			let mut progressed = false;
			let mut invalidated = false;
			for (direction, header) in steps {
				if self.cancel.load(Ordering::Relaxed) {
					return Err(ErrorKind::Cancelled.into());
				}
				let new_tip = match direction {
					Direction::Forward => Tip::from_header(&header),
					Direction::Reverse => {
						let parent =
							self.current.lock().ancestor(header.height - 1).cloned();
						let parent = parent.ok_or_else(|| {
							ErrorKind::Corruption(format!(
								"no parent for disconnect at {}",
								header.height
							))
						})?;
						Tip::from_header(&parent)
					}
				};
				match self.replay_step(&header, direction, &new_tip) {
					Ok(()) => {
						{
							let mut current = self.current.lock();
							match direction {
								Direction::Forward => {
									if !current.push(header.clone()) {
										return Err(ErrorKind::Corruption(
											"connect step does not extend the chain".to_string(),
										)
										.into());
									}
								}
								Direction::Reverse => {
									current.pop();
								}
							}
						}
						match direction {
							Direction::Forward => {
								debug!("connected {} at {}", header.hash(), header.height);
								self.adapter.block_connected(&header);
							}
							Direction::Reverse => {
								debug!("disconnected {} at {}", header.hash(), header.height);
								self.adapter.block_disconnected(&header);
							}
						}
						progressed = true;
					}
					Err(e) => match e.kind() {
						ErrorKind::Validation(hash) => {
							warn!(
								"block {} at {} failed validation, marking invalid",
								hash, header.height
							);
							self.graph.mark_invalid(&header.hash())?;
							invalidated = true;
							break;
						}
						ErrorKind::MissingData(hash) => {
							info!("block data missing for {}, aborting this pass", hash);
							self.adapter.block_txes_missed(&hash);
							return Ok(self.tip());
						}
						_ => return Err(e),
					},
				}
				if started.elapsed() >= self.config.snapshot_budget() {
					// yield the snapshot and re-enter the walker
					debug!("snapshot budget expired, re-planning from a fresh tip");
					break;
				}
			}
			if !progressed && !invalidated {
				break;
			}
		}

		let chain = self.current.lock().clone();
		self.pruner.prune_to(&chain)?;
		let tip = self.tip();
		self.adapter.tip_updated(&tip);
		Ok(tip)
	}

	// One walker step: take a pooled cursor, run the replay pipeline on
	// it, and commit the step's effects together with the new tip. Cursor
	// rollback is unconditional on any error path.
	fn replay_step(
		&self,
		header: &ChainedHeader,
		direction: Direction,
		new_tip: &Tip,
	) -> Result<(), Error> {
		let mut cursor = self.cursor_pool.take(self.config.cursor_timeout())?;
		let replayer = BlockReplayer::new(self.txes.clone(), self.utxo.clone());
		let mut sinks = self.sinks.lock();
		let result = pipeline::run_step(
			&replayer,
			&mut *cursor,
			header,
			direction,
			&self.config.duplicate_coinbases,
			&mut sinks[..],
			&self.cancel,
			self.config.pipeline_capacity,
		);
		match result {
			Ok(()) => {
				cursor.save_validated_tip(new_tip)?;
				cursor.commit()?;
				Ok(())
			}
			Err(e) => {
				cursor.rollback();
				Err(e)
			}
		}
	}

	/// Registers an ordered consumer of the replay stream.
	pub fn register_sink(&self, sink: Box<dyn ReplaySink>) {
		self.sinks.lock().push(sink);
	}

	/// Requests cooperative shutdown of replay and workers.
	pub fn shutdown(&self) {
		self.cancel.store(true, Ordering::Relaxed);
	}

	/// The tip of the validated chain.
	pub fn tip(&self) -> Tip {
		Tip::from_header(self.current.lock().tip())
	}

	/// A clone of the validated chain.
	pub fn current_chain(&self) -> Chain {
		self.current.lock().clone()
	}

	/// The header graph, for chaining and lookups.
	pub fn graph(&self) -> &HeaderGraph {
		&self.graph
	}

	/// Read access to the unspent set.
	pub fn utxo(&self) -> &UtxoStore {
		&self.utxo
	}

	/// The block-transactions storage collaborator.
	pub fn txes(&self) -> &Arc<dyn BlockTxesStorage> {
		&self.txes
	}

	/// Whether a block has been marked consensus-invalid.
	pub fn is_block_invalid(&self, hash: &Hash) -> Result<bool, Error> {
		self.blocks.is_block_invalid(hash)
	}

	/// Number of transactions with at least one unspent output.
	pub fn unspent_tx_count(&self) -> Result<u64, Error> {
		self.utxo.counter(UNSPENT_TX_COUNT)
	}

	/// Number of outputs not yet spent.
	pub fn unspent_output_count(&self) -> Result<u64, Error> {
		self.utxo.counter(UNSPENT_OUTPUT_COUNT)
	}

	/// Number of transactions ever connected, genesis excluded.
	pub fn total_tx_count(&self) -> Result<u64, Error> {
		self.utxo.counter(TOTAL_TX_COUNT)
	}

	/// Number of inputs ever spent.
	pub fn total_input_count(&self) -> Result<u64, Error> {
		self.utxo.counter(TOTAL_INPUT_COUNT)
	}

	/// Number of outputs ever minted.
	pub fn total_output_count(&self) -> Result<u64, Error> {
		self.utxo.counter(TOTAL_OUTPUT_COUNT)
	}
}

/// Spawns the background worker that keeps the validated chain on the best
/// tip. The worker never dies silently: errors are logged and it restarts
/// after a backoff.
pub fn start_head_worker(state: Arc<ChainState>) -> io::Result<thread::JoinHandle<()>> {
	thread::Builder::new()
		.name("chain-head".to_string())
		.spawn(move || {
			let mut backoff_secs = 1;
			while !state.cancel.load(Ordering::Relaxed) {
				match state.update_head() {
					Ok(_) => {
						backoff_secs = 1;
					}
					Err(e) => match e.kind() {
						ErrorKind::Cancelled => break,
						kind => {
							error!("chain head worker: {}, restarting", kind);
							thread::sleep(Duration::from_secs(backoff_secs));
							backoff_secs = std::cmp::min(backoff_secs * 2, 60);
						}
					},
				}
				thread::sleep(Duration::from_millis(250));
			}
			debug!("chain head worker exiting");
		})
}
