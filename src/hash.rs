//! Hash computation for cross-domain messages
//!
//! Functions here must match the on-chain derivations performed by the
//! messenger, message passer and `Lib_MerkleTree` contracts bit for bit.

use alloy::primitives::{Address, B256};
use tiny_keccak::{Hasher, Keccak};

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Hash an interior Merkle node: keccak256(left ‖ right)
pub fn hash_pair(left: &B256, right: &B256) -> B256 {
    let mut hasher = Keccak::v256();
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    B256::from(output)
}

/// Filler for padding leaves: keccak256 of 32 zero bytes
///
/// 0x290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563
pub fn empty_leaf() -> B256 {
    B256::from(keccak256(&[0u8; 32]))
}

/// Storage slot in the message passer recording a sent message
///
/// keccak256(keccak256(encodedMessage ‖ messenger) ‖ bytes32(0)), i.e. the
/// `sentMessages` mapping (slot 0) keyed by the message hash including the
/// sending messenger's address.
pub fn message_slot(encoded_message: &[u8], messenger: Address) -> B256 {
    let mut inner = Vec::with_capacity(encoded_message.len() + 20);
    inner.extend_from_slice(encoded_message);
    inner.extend_from_slice(messenger.as_slice());
    let message_key = keccak256(&inner);

    let mut outer = [0u8; 64];
    outer[..32].copy_from_slice(&message_key);
    B256::from(keccak256(&outer))
}

/// Convert bytes to hex string with 0x prefix
pub fn bytes32_to_hex(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256() {
        let result = keccak256(b"hello");
        assert_eq!(
            bytes32_to_hex(&result),
            "0x1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn test_empty_leaf() {
        assert_eq!(
            bytes32_to_hex(&empty_leaf().0),
            "0x290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
        );
    }

    #[test]
    fn test_hash_pair_matches_concatenation() {
        let left = B256::repeat_byte(0x01);
        let right = B256::repeat_byte(0x02);
        let mut joined = [0u8; 64];
        joined[..32].copy_from_slice(left.as_slice());
        joined[32..].copy_from_slice(right.as_slice());
        assert_eq!(hash_pair(&left, &right).0, keccak256(&joined));
        assert_ne!(hash_pair(&left, &right), hash_pair(&right, &left));
    }

    #[test]
    fn test_message_slot_matches_alloy_keccak() {
        let encoded = [0xabu8; 100];
        let messenger = Address::repeat_byte(0x42);

        let mut inner = encoded.to_vec();
        inner.extend_from_slice(messenger.as_slice());
        let key = alloy::primitives::keccak256(&inner);
        let mut outer = key.to_vec();
        outer.extend_from_slice(&[0u8; 32]);
        let expected = alloy::primitives::keccak256(&outer);

        assert_eq!(message_slot(&encoded, messenger), expected);
    }

    #[test]
    fn test_message_slot_depends_on_messenger() {
        let encoded = [0x01u8; 10];
        assert_ne!(
            message_slot(&encoded, Address::repeat_byte(1)),
            message_slot(&encoded, Address::repeat_byte(2))
        );
    }
}
