use crate::error::{LedgerError, LedgerResult};

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const MIN_ADDRESS_LEN: usize = 32;
const MAX_ADDRESS_LEN: usize = 44;

/// Checks that `wallet` looks like a base58 ed25519 public key.
///
/// Only the encoding is checked; whether the key is on-curve is left to the
/// transfer layer. Addresses double as storage keys, so anything outside the
/// base58 alphabet is rejected here.
pub fn validate_wallet(wallet: &str) -> LedgerResult<()> {
    if wallet.len() < MIN_ADDRESS_LEN || wallet.len() > MAX_ADDRESS_LEN {
        return Err(LedgerError::InvalidArgument(format!(
            "wallet address must be between {MIN_ADDRESS_LEN} and {MAX_ADDRESS_LEN} chars"
        )));
    }
    if !wallet.bytes().all(|b| BASE58_ALPHABET.contains(&b)) {
        return Err(LedgerError::InvalidArgument(
            "wallet address must be base58".to_string(),
        ));
    }
    Ok(())
}
