//! Mempool state.

use chainmesh_types::Transaction;

/// Insertion-ordered buffer of transactions awaiting inclusion in a block.
#[derive(Debug, Default)]
pub struct Mempool {
    buf: Vec<Transaction>,
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool::default()
    }

    /// Append a transaction after verification.
    pub fn add(&mut self, tx: Transaction) {
        if self.verify(&tx) {
            self.buf.push(tx);
        }
    }

    /// Remove and return the first `min(max_txs, len)` transactions.
    pub fn drain(&mut self, max_txs: usize) -> Vec<Transaction> {
        let n = max_txs.min(self.buf.len());
        self.buf.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    // Verification hook. Signature checks would live here; for the
    // simulation every transaction is admissible.
    fn verify(&self, _tx: &Transaction) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainmesh_types::TxType;

    fn tx(tag: &str) -> Transaction {
        Transaction {
            from: "a".into(),
            to: "b".into(),
            payload: tag.into(),
            tx_type: TxType::Regular,
            tx_id: format!("tx_{tag}"),
        }
    }

    #[test]
    fn test_drain_preserves_insertion_order() {
        let mut pool = Mempool::new();
        for tag in ["one", "two", "three"] {
            pool.add(tx(tag));
        }
        let drained = pool.drain(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].payload, "one");
        assert_eq!(drained[1].payload, "two");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_drain_more_than_available() {
        let mut pool = Mempool::new();
        pool.add(tx("only"));
        let drained = pool.drain(10);
        assert_eq!(drained.len(), 1);
        assert!(pool.is_empty());
        assert!(pool.drain(10).is_empty());
    }
}
