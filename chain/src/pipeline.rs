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

//! The bounded replay dataflow for one step: a source thread loads
//! transactions, the state engine applies them on the calling thread, and
//! the result fans out to every sink over its own bounded channel, in
//! block order. Completion propagates downstream by closing channels;
//! cancellation propagates upstream the same way.

use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::core::core::hash::Hash;
use crate::core::core::ChainedHeader;
use crate::error::{Error, ErrorKind};
use crate::replay::BlockReplayer;
use crate::store::UtxoCursor;
use crate::types::{Direction, LoadedTx, Rules, ValidatableTx};
use crate::utxo::UtxoEngine;
use crate::wallet::ReplaySink;

/// A sink running the rules oracle over every forward transaction, the
/// validator leg of the fan-out.
pub struct RulesSink {
	rules: Arc<dyn Rules>,
}

impl RulesSink {
	/// Wraps the given rules oracle.
	pub fn new(rules: Arc<dyn Rules>) -> RulesSink {
		RulesSink { rules }
	}
}

impl ReplaySink for RulesSink {
	fn name(&self) -> &str {
		"rules"
	}

	fn process(&mut self, direction: Direction, tx: Arc<ValidatableTx>) -> Result<(), Error> {
		if direction.is_forward() {
			self.rules.validate_transaction(&tx)
		} else {
			Ok(())
		}
	}
}

/// Runs one replay step through the full dataflow. On success the per-step
/// indices have been staged on the cursor, which the caller then commits;
/// on any error the caller rolls the cursor back and nothing escapes.
pub fn run_step(
	replayer: &BlockReplayer,
	cursor: &mut UtxoCursor,
	header: &ChainedHeader,
	direction: Direction,
	duplicate_coinbases: &[(u64, Hash)],
	sinks: &mut [Box<dyn ReplaySink>],
	cancel: &Arc<AtomicBool>,
	capacity: usize,
) -> Result<(), Error> {
	let stream = replayer.replay_block(header, direction, cancel.clone())?;
	let mut engine = UtxoEngine::new(cursor, header, direction, duplicate_coinbases)?;

	let result = thread::scope(|scope| -> Result<(), Error> {
		let (source_tx, source_rx) = mpsc::sync_channel::<Result<LoadedTx, Error>>(capacity);
		let source = thread::Builder::new()
			.name("replay-source".to_string())
			.spawn_scoped(scope, move || {
				for item in stream {
					// a closed channel means downstream gave up
					if source_tx.send(item).is_err() {
						break;
					}
				}
			})
			.map_err(|e| ErrorKind::Other(format!("failed to spawn replay source: {}", e)))?;

		let mut sink_txs = Vec::with_capacity(sinks.len());
		let mut sink_handles = Vec::with_capacity(sinks.len());
		for sink in sinks.iter_mut() {
			let (sink_tx, sink_rx) = mpsc::sync_channel::<Arc<ValidatableTx>>(capacity);
			let name = format!("replay-sink-{}", sink.name());
			let handle = thread::Builder::new()
				.name(name)
				.spawn_scoped(scope, move || -> Result<(), Error> {
					while let Ok(tx) = sink_rx.recv() {
						sink.process(direction, tx)?;
					}
					sink.complete(direction)
				})
				.map_err(|e| ErrorKind::Other(format!("failed to spawn replay sink: {}", e)))?;
			sink_txs.push(sink_tx);
			sink_handles.push(handle);
		}

		let mut step_result: Result<(), Error> = Ok(());
		for item in source_rx.iter() {
			let loaded = match item {
				Ok(loaded) => loaded,
				Err(e) => {
					step_result = Err(e);
					break;
				}
			};
			let validatable = match engine.apply(&loaded) {
				Ok(validatable) => Arc::new(validatable),
				Err(e) => {
					step_result = Err(e);
					break;
				}
			};
			let mut sink_gone = false;
			for sink_tx in &sink_txs {
				if sink_tx.send(validatable.clone()).is_err() {
					sink_gone = true;
				}
			}
			if sink_gone {
				// the real cause surfaces when the sink is joined below
				step_result = Err(ErrorKind::Cancelled.into());
				break;
			}
		}
		// closing the channels completes the sinks and stops the source
		drop(source_rx);
		drop(sink_txs);

		for handle in sink_handles {
			match handle.join() {
				Ok(Ok(())) => {}
				Ok(Err(e)) => {
					let supersedes = match step_result {
						Ok(()) => true,
						Err(ref current) => current.kind() == ErrorKind::Cancelled,
					};
					if supersedes {
						step_result = Err(e);
					}
				}
				Err(_) => {
					step_result =
						Err(ErrorKind::Other("replay sink panicked".to_string()).into());
				}
			}
		}
		let _ = source.join();
		step_result
	});
	result?;

	engine.finish()
}
