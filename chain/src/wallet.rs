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

//! The consumer contract for the replay stream. Wallet monitors and other
//! scanners register a sink and get every replayed transaction pushed to
//! them in block order, with the direction of the step; there are no
//! references back into the engine.

use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::types::{Direction, ValidatableTx};

/// An ordered consumer of the replay stream. Each sink sees the
/// transactions of every step in block order; a sink error aborts the step
/// and rolls the cursor back. Sinks run while the step's cursor holds the
/// store's write transaction, so they must not open one of their own.
pub trait ReplaySink: Send {
	/// Short name, used for the sink's worker thread.
	fn name(&self) -> &str;

	/// One replayed transaction, in order. Forward steps deliver connected
	/// transactions, reverse steps deliver unminted ones with the previous
	/// outputs they had consumed.
	fn process(&mut self, direction: Direction, tx: Arc<ValidatableTx>) -> Result<(), Error>;

	/// The step completed; all of its transactions have been delivered.
	fn complete(&mut self, _direction: Direction) -> Result<(), Error> {
		Ok(())
	}
}

/// A sink that forwards the replay stream over a bounded channel, the
/// wallet-monitor integration point: the monitor owns the receiving end
/// and rewinds or scans at its own pace.
pub struct ChannelSink {
	name: String,
	sender: SyncSender<(Direction, Arc<ValidatableTx>)>,
}

impl ChannelSink {
	/// Builds the sink and the receiver handed to the consumer.
	pub fn new(
		name: &str,
		capacity: usize,
	) -> (ChannelSink, Receiver<(Direction, Arc<ValidatableTx>)>) {
		let (sender, receiver) = std::sync::mpsc::sync_channel(capacity);
		(
			ChannelSink {
				name: name.to_string(),
				sender,
			},
			receiver,
		)
	}
}

impl ReplaySink for ChannelSink {
	fn name(&self) -> &str {
		&self.name
	}

	fn process(&mut self, direction: Direction, tx: Arc<ValidatableTx>) -> Result<(), Error> {
		self.sender
			.send((direction, tx))
			.map_err(|_| ErrorKind::Cancelled.into())
	}
}
