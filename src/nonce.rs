//! The nonce allocator (§4.4): a monotone per-(user,provider) counter seeded from the
//! chain's authoritative last-nonce on cold start, then incremented atomically in the
//! store. Parameterized over [`LastNonceSource`] rather than the full chain client, so
//! tests can substitute a fake that returns a fixed value (Design Note 1).

use std::sync::Arc;

use alloy_primitives::Address;

use crate::chain::LastNonceSource;
use crate::store::{Store, StoreError};
use crate::voucher::nonce_key;

pub struct NonceAllocator {
    store: Arc<dyn Store>,
    chain: Arc<dyn LastNonceSource>,
}

impl NonceAllocator {
    pub fn new(store: Arc<dyn Store>, chain: Arc<dyn LastNonceSource>) -> Self {
        Self { store, chain }
    }

    /// `incrementNonce(user, provider) -> uint64` (§4.4).
    ///
    /// Returns a value strictly greater than the chain's last committed nonce for this
    /// pair, and strictly greater than any value previously returned for the same pair.
    pub async fn increment_nonce(&self, user: Address, provider: Address) -> Result<u64, StoreError> {
        let key = nonce_key(user, provider);

        // Warm key: just INCR, no chain round trip. A concurrent cold-start seeder
        // racing this check is still safe — seed_and_increment's SET is NX.
        if self.store.key_exists(&key).await? {
            return self.store.increment(&key).await;
        }

        let seed = match self.chain.get_last_nonce(user, provider).await {
            Ok(last) => last,
            Err(err) => {
                tracing::warn!(?err, %user, %provider, "getLastNonce failed, seeding nonce counter at 0");
                0
            }
        };
        self.store.seed_and_increment(&key, seed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::FakeChain;
    use crate::store::FakeStore;
    use alloy_primitives::address;
    use std::sync::Arc;

    fn addrs() -> (Address, Address) {
        (
            address!("1111111111111111111111111111111111111111"),
            address!("2222222222222222222222222222222222222222"),
        )
    }

    #[tokio::test]
    async fn seeds_from_chain_on_cold_start() {
        let (user, provider) = addrs();
        let chain = Arc::new(FakeChain::new());
        chain.seed_last_nonce(user, provider, 5);
        let allocator = NonceAllocator::new(Arc::new(FakeStore::new()), chain);

        let n1 = allocator.increment_nonce(user, provider).await.unwrap();
        let n2 = allocator.increment_nonce(user, provider).await.unwrap();

        assert_eq!(n1, 6);
        assert_eq!(n2, 7);
    }

    #[tokio::test]
    async fn falls_back_to_zero_seed_on_chain_error() {
        let (user, provider) = addrs();
        let chain = Arc::new(FakeChain::new());
        *chain.fail_last_nonce.lock().unwrap() = true;
        let allocator = NonceAllocator::new(Arc::new(FakeStore::new()), chain);

        let n1 = allocator.increment_nonce(user, provider).await.unwrap();
        assert_eq!(n1, 1);
    }

    #[tokio::test]
    async fn concurrent_callers_on_cold_key_get_distinct_increasing_values() {
        let (user, provider) = addrs();
        let chain = Arc::new(FakeChain::new());
        chain.seed_last_nonce(user, provider, 100);
        let allocator = Arc::new(NonceAllocator::new(Arc::new(FakeStore::new()), chain));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move {
                allocator.increment_nonce(user, provider).await.unwrap()
            }));
        }
        let mut results: Vec<u64> = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results.sort_unstable();
        let expected: Vec<u64> = (101..=116).collect();
        assert_eq!(results, expected);
    }
}
