//! ERC-20 `Transfer` decoder.
//!
//! `Transfer(address indexed from, address indexed to, uint256 value)`:
//! - `topics[0]`: event signature hash
//! - `topics[1]`, `topics[2]`: left-padded `from` / `to`
//! - `data`: the 32-byte big-endian `value`
//!
//! Decoding is pure. The block timestamp is attached afterwards with
//! [`DecodedTransfer::at`] since it needs a provider round-trip.

use alloy_primitives::{b256, Address, B256, U256};
use chrono::{DateTime, Utc};

use transferindex_core::error::DecodeError;
use transferindex_core::types::{hash_to_string, ChainLog, TransferEvent};

/// `keccak256("Transfer(address,address,uint256)")`
pub const TRANSFER_SIGNATURE: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// A decoded transfer that has not been timestamped yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub transaction_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
}

impl DecodedTransfer {
    /// Attach the containing block's timestamp.
    pub fn at(self, timestamp: DateTime<Utc>) -> TransferEvent {
        TransferEvent {
            from: self.from,
            to: self.to,
            amount: self.amount.to_string(),
            transaction_hash: self.transaction_hash,
            block_number: self.block_number,
            log_index: self.log_index,
            timestamp,
        }
    }
}

/// Decode a raw log into a transfer.
pub fn decode_transfer(log: &ChainLog) -> Result<DecodedTransfer, DecodeError> {
    if log.topics.len() != 3 {
        return Err(DecodeError::TopicCount {
            actual: log.topics.len(),
        });
    }
    if log.topics[0] != TRANSFER_SIGNATURE {
        return Err(DecodeError::NotTransfer {
            topic0: hash_to_string(&log.topics[0]),
        });
    }
    if log.data.len() != 32 {
        return Err(DecodeError::DataLength {
            actual: log.data.len(),
        });
    }

    Ok(DecodedTransfer {
        from: Address::from_word(log.topics[1]),
        to: Address::from_word(log.topics[2]),
        amount: U256::from_be_slice(&log.data),
        transaction_hash: log.transaction_hash,
        block_number: log.block_number,
        log_index: log.log_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{address, keccak256};
    use chrono::TimeZone;

    fn transfer_log(from: Address, to: Address, amount: U256) -> ChainLog {
        ChainLog {
            address: address!("dAC17F958D2ee523a2206206994597C13D831ec7"),
            topics: vec![TRANSFER_SIGNATURE, from.into_word(), to.into_word()],
            data: amount.to_be_bytes::<32>().to_vec(),
            block_number: 18_000_000,
            block_hash: Some(B256::repeat_byte(0x01)),
            log_index: 42,
            transaction_hash: B256::repeat_byte(0x02),
            removed: false,
        }
    }

    #[test]
    fn signature_matches_event_abi() {
        assert_eq!(keccak256("Transfer(address,address,uint256)"), TRANSFER_SIGNATURE);
    }

    #[test]
    fn decodes_addresses_and_amount() {
        let from = address!("28C6c06298d514Db089934071355E5743bf21d60");
        let to = address!("A9D1e08C7793af67e9d92fe308d5697FB81d3E43");
        let log = transfer_log(from, to, U256::from(1_500_000u64));

        let decoded = decode_transfer(&log).unwrap();
        assert_eq!(decoded.from, from);
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.amount, U256::from(1_500_000u64));
        assert_eq!(decoded.block_number, 18_000_000);
        assert_eq!(decoded.log_index, 42);
    }

    #[test]
    fn amount_is_exact_beyond_u128() {
        let log = transfer_log(Address::ZERO, Address::repeat_byte(1), U256::MAX);
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let event = decode_transfer(&log).unwrap().at(ts);
        assert_eq!(
            event.amount,
            "115792089237316195423570985008687907853269984665640564039457584007913129639935"
        );
        assert_eq!(event.timestamp, ts);
    }

    #[test]
    fn rejects_wrong_topic_count() {
        let mut log = transfer_log(Address::ZERO, Address::ZERO, U256::from(1));
        log.topics.truncate(2);
        assert_eq!(
            decode_transfer(&log),
            Err(DecodeError::TopicCount { actual: 2 })
        );

        log.topics = vec![TRANSFER_SIGNATURE; 4];
        assert_eq!(
            decode_transfer(&log),
            Err(DecodeError::TopicCount { actual: 4 })
        );
    }

    #[test]
    fn rejects_approval_log() {
        // Approval(address,address,uint256) also has three topics
        let mut log = transfer_log(Address::ZERO, Address::ZERO, U256::from(1));
        log.topics[0] = keccak256("Approval(address,address,uint256)");
        assert!(matches!(
            decode_transfer(&log),
            Err(DecodeError::NotTransfer { .. })
        ));
    }

    #[test]
    fn rejects_short_data() {
        let mut log = transfer_log(Address::ZERO, Address::ZERO, U256::from(1));
        log.data = vec![0u8; 31];
        assert_eq!(
            decode_transfer(&log),
            Err(DecodeError::DataLength { actual: 31 })
        );
    }
}
