//! Assembled blocks and their opaque body payloads.

use crate::Header;
use alloy_primitives::Bytes;
use serde::{Deserialize, Serialize};

/// An encoded transaction. The consensus engine never looks inside.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction(pub Bytes);

/// An encoded receipt, produced by execution after the fact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt(pub Bytes);

/// A header together with its body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// Transactions included in the block.
    pub transactions: Vec<Transaction>,
    /// Uncle headers. DPoVP blocks never carry any.
    pub uncles: Vec<Header>,
    /// Execution receipts, one per transaction.
    pub receipts: Vec<Receipt>,
}

impl Block {
    /// Assemble a block from its parts.
    pub fn new(
        header: Header,
        transactions: Vec<Transaction>,
        uncles: Vec<Header>,
        receipts: Vec<Receipt>,
    ) -> Self {
        Self { header, transactions, uncles, receipts }
    }

    /// Return a copy of this block carrying `header`, keeping the body.
    pub fn with_seal(&self, header: Header) -> Self {
        Self {
            header,
            transactions: self.transactions.clone(),
            uncles: self.uncles.clone(),
            receipts: self.receipts.clone(),
        }
    }

    /// Block height, taken from the header.
    pub fn number(&self) -> u64 {
        self.header.number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;

    #[test]
    fn with_seal_keeps_body() {
        let block = Block::new(
            Header { number: 5, ..Default::default() },
            vec![Transaction(Bytes::from_static(b"tx"))],
            Vec::new(),
            vec![Receipt(Bytes::from_static(b"rc"))],
        );
        let sealed_header = Header {
            number: 5,
            sign_info: Bytes::from(vec![0u8; crate::SIGN_INFO_LENGTH]),
            ..Default::default()
        };
        let sealed = block.with_seal(sealed_header.clone());
        assert_eq!(sealed.header, sealed_header);
        assert_eq!(sealed.transactions, block.transactions);
        assert_eq!(sealed.receipts, block.receipts);
    }
}
