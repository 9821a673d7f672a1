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

//! All the consensus-critical constants and arithmetic the chain-state
//! engine relies on. Values here must be reproduced bit-exact by any
//! compatible implementation.

use num_bigint::BigUint;

use crate::core::hash::Hash;

/// A coin, the smallest unit being one hundred-millionth of it.
pub const COIN: u64 = 100_000_000;

/// Number of blocks the pruning horizon lags the validated tip by, roughly
/// one week of blocks. Reorganizations deeper than this are unsupported.
pub const PRUNE_HORIZON: u64 = 7 * 144;

/// An intentionally easy compact target, handy for tests and local chains.
pub const EASY_POW_BITS: u32 = 0x207f_ffff;

lazy_static! {
	/// The two historical coinbase transactions that were re-mined with an
	/// identical hash at a later height. For these, and only these, minting
	/// is skipped on the second occurrence so the earlier instance's outputs
	/// stay addressable.
	pub static ref DUPLICATE_COINBASES: Vec<(u64, Hash)> = vec![
		(
			91_722,
			Hash::from_hex("e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468")
				.expect("invalid duplicate coinbase hash"),
		),
		(
			91_812,
			Hash::from_hex("d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599")
				.expect("invalid duplicate coinbase hash"),
		),
	];
}

/// Whether the given (height, coinbase hash) pair is one of the frozen
/// duplicate-coinbase identities in the provided table.
pub fn is_duplicate_coinbase(table: &[(u64, Hash)], height: u64, tx_hash: &Hash) -> bool {
	table
		.iter()
		.any(|(h, hash)| *h == height && hash == tx_hash)
}

/// The amount of work a header with the given compact target contributes to
/// its chain, computed as 2^256 / (target + 1). Returns None when the bits
/// encode a negative, zero or overflowing target, which no valid header
/// carries.
pub fn work_for_bits(bits: u32) -> Option<BigUint> {
	let exponent = bits >> 24;
	let mantissa = bits & 0x007f_ffff;
	if bits & 0x0080_0000 != 0 {
		warn!("work_for_bits: negative target in compact bits {:x}", bits);
		return None;
	}
	if mantissa == 0 {
		return None;
	}
	let target = if exponent <= 3 {
		BigUint::from(mantissa >> (8 * (3 - exponent)))
	} else {
		BigUint::from(mantissa) << (8 * (exponent - 3)) as usize
	};
	if target == BigUint::from(0u32) {
		return None;
	}
	let numerator = BigUint::from(1u32) << 256;
	if target >= numerator {
		return None;
	}
	Some(numerator / (target + BigUint::from(1u32)))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn work_rejects_malformed_bits() {
		// negative target
		assert!(work_for_bits(0x0480_0001).is_none());
		// zero mantissa
		assert!(work_for_bits(0x0400_0000).is_none());
		// overflowing target
		assert!(work_for_bits(0xff7f_ffff).is_none());
	}

	#[test]
	fn work_is_monotonic_in_target() {
		// a smaller target means more work
		let easy = work_for_bits(EASY_POW_BITS).unwrap();
		let harder = work_for_bits(0x1d00_ffff).unwrap();
		assert!(harder > easy);
	}

	#[test]
	fn duplicate_coinbase_table_is_frozen() {
		assert_eq!(DUPLICATE_COINBASES.len(), 2);
		assert_eq!(DUPLICATE_COINBASES[0].0, 91_722);
		assert_eq!(DUPLICATE_COINBASES[1].0, 91_812);
		assert!(is_duplicate_coinbase(
			&DUPLICATE_COINBASES,
			91_722,
			&DUPLICATE_COINBASES[0].1
		));
		assert!(!is_duplicate_coinbase(
			&DUPLICATE_COINBASES,
			91_723,
			&DUPLICATE_COINBASES[0].1
		));
	}
}
