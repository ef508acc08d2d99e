use std::fmt;

use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{SecretKey, rand};

const FEE_PREFIX: &str = "fee_";
const CLAIM_PREFIX: &str = "claim_";

/// Invoice label tying a settled payment to the swap that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvoiceLabel {
    Fee(String),
    Claim(String),
}

impl InvoiceLabel {
    pub fn parse(label: &str) -> Option<Self> {
        if let Some(id) = label.strip_prefix(FEE_PREFIX)
            && !id.is_empty()
        {
            return Some(Self::Fee(id.to_string()));
        }
        if let Some(id) = label.strip_prefix(CLAIM_PREFIX)
            && !id.is_empty()
        {
            return Some(Self::Claim(id.to_string()));
        }
        None
    }

    pub fn swap_id(&self) -> &str {
        match self {
            Self::Fee(id) | Self::Claim(id) => id,
        }
    }
}

impl fmt::Display for InvoiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fee(id) => write!(f, "{FEE_PREFIX}{id}"),
            Self::Claim(id) => write!(f, "{CLAIM_PREFIX}{id}"),
        }
    }
}

/// Fresh random 32-byte preimage, hex encoded.
pub fn new_preimage_hex() -> String {
    let secret = SecretKey::new(&mut rand::thread_rng());
    hex::encode(secret.secret_bytes())
}

pub fn payment_hash_hex(preimage_hex: &str) -> anyhow::Result<String> {
    let preimage = hex::decode(preimage_hex)
        .map_err(|e| anyhow::anyhow!("decode preimage hex: {e}"))?;
    anyhow::ensure!(preimage.len() == 32, "preimage must be 32 bytes");
    Ok(hex::encode(sha256::Hash::hash(&preimage).to_byte_array()))
}
