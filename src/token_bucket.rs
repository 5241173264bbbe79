/// This module includes the "Token Bucket" pacing used for connection admission.
/// For inspiration see: https://en.wikipedia.org/wiki/Token_bucket
///
/// Rather than counting tokens, the bucket remembers the instant at which its
/// earliest unspent token was minted. Tokens are minted one per `token_interval`,
/// and at most `capacity` may be banked, so the long-run rate is capped at one
/// per interval while a full bucket allows a burst of `capacity`.
use std::time::Duration;

use tokio::time::{self, Instant};

#[derive(Clone, Debug)]
pub struct TokenBucket {
    capacity: usize,
    token_interval: Duration,
    // Span over which a full bucket's tokens were minted
    refill_duration: Duration,
    earliest_unspent_token: Instant,
}

impl TokenBucket {
    pub fn new(capacity: usize, token_interval: Duration) -> Self {
        let capacity = capacity.max(1);
        let refill_duration = token_interval * (capacity as u32 - 1);
        let mut bucket = Self {
            capacity,
            token_interval,
            refill_duration,
            earliest_unspent_token: Instant::now(),
        };
        bucket.earliest_unspent_token = bucket.capacity_token();
        bucket
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a token is available, then spend it
    pub async fn wait(&mut self) {
        // If the earliest unspent token is in the future, sleep until then
        if self.earliest_unspent_token > Instant::now() {
            time::sleep_until(self.earliest_unspent_token).await;
        }

        // Otherwise enforce bucket capacity
        let capacity_token = self.capacity_token();
        if self.earliest_unspent_token < capacity_token {
            self.earliest_unspent_token = capacity_token;
        }

        // 'Remove' a token from the bucket
        self.earliest_unspent_token += self.token_interval;
    }

    /// Tokens currently banked
    pub fn available(&self) -> usize {
        let now = Instant::now();
        let earliest = self.earliest_unspent_token.max(self.capacity_token());
        if earliest > now {
            return 0;
        }
        let banked = (now - earliest).as_nanos() / self.token_interval.as_nanos().max(1) + 1;
        (banked as usize).min(self.capacity)
    }

    // The mint time of the oldest token a full bucket would still hold
    fn capacity_token(&self) -> Instant {
        let now = Instant::now();
        now.checked_sub(self.refill_duration).unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_of_capacity_is_immediate() {
        let mut bucket = TokenBucket::new(5, Duration::from_millis(50));
        assert_eq!(bucket.available(), 5);

        let start = Instant::now();
        for _ in 0..5 {
            bucket.wait().await;
        }
        assert_eq!(Instant::now(), start);
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_blocks_for_token_interval() {
        let delay = Duration::from_millis(50);
        let mut bucket = TokenBucket::new(3, delay);
        for _ in 0..3 {
            bucket.wait().await;
        }

        let start = Instant::now();
        bucket.wait().await;
        assert!(Instant::now() - start >= delay);

        let start = Instant::now();
        bucket.wait().await;
        assert!(Instant::now() - start >= delay);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_bucket_refills_to_capacity_only() {
        let delay = Duration::from_millis(10);
        let mut bucket = TokenBucket::new(4, delay);
        for _ in 0..4 {
            bucket.wait().await;
        }

        time::advance(Duration::from_secs(10)).await;
        assert_eq!(bucket.available(), 4);

        let start = Instant::now();
        for _ in 0..4 {
            bucket.wait().await;
        }
        assert_eq!(Instant::now(), start);

        bucket.wait().await;
        assert!(Instant::now() - start >= delay);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_capacity_is_treated_as_one() {
        let mut bucket = TokenBucket::new(0, Duration::from_millis(20));
        assert_eq!(bucket.capacity(), 1);
        let start = Instant::now();
        bucket.wait().await;
        assert_eq!(Instant::now(), start);
        bucket.wait().await;
        assert!(Instant::now() - start >= Duration::from_millis(20));
    }
}
