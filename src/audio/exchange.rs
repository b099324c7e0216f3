//! Blocking single-producer/single-consumer sample exchange
//!
//! Wraps a [`SampleRingBuffer`] in one mutex with two condition variables:
//! `data_ready` for the consumer and `space_ready` for the producer. Every
//! waiter re-checks its predicate and the stop token after each wake.

use super::ring::SampleRingBuffer;
use super::stop::StopToken;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use thiserror::Error;

/// Sample exchange errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Invalid buffer geometry: capacity {capacity}, margin {margin}")]
    Geometry { capacity: usize, margin: usize },

    #[error("Requested {requested} samples but at most {limit} can ever fit")]
    Oversized { requested: usize, limit: usize },

    #[error("Exchange interrupted by shutdown")]
    Shutdown,
}

/// Bounded blocking exchange between the capture and analysis roles
pub struct SampleExchange {
    ring: Mutex<SampleRingBuffer>,
    data_ready: Condvar,
    space_ready: Condvar,
    stop: StopToken,
}

impl SampleExchange {
    /// Create an exchange whose waits are released when `stop` is tripped.
    pub fn new(
        capacity: usize,
        margin: usize,
        stop: StopToken,
    ) -> Result<Arc<Self>, ExchangeError> {
        let ring = SampleRingBuffer::new(capacity, margin)?;
        let exchange = Arc::new(Self {
            ring: Mutex::new(ring),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            stop: stop.clone(),
        });

        let weak = Arc::downgrade(&exchange);
        stop.on_stop(move || {
            if let Some(exchange) = weak.upgrade() {
                exchange.interrupt();
            }
        });

        Ok(exchange)
    }

    /// Largest chunk a single push or pop may request
    pub fn limit(&self) -> usize {
        self.ring.lock().limit()
    }

    pub fn available(&self) -> usize {
        self.ring.lock().available()
    }

    /// Push `chunk`, waiting for room if needed.
    pub fn push(&self, chunk: &[f32]) -> Result<(), ExchangeError> {
        let mut ring = self.ring.lock();
        ring.check_request(chunk.len())?;
        if chunk.is_empty() {
            return Ok(());
        }

        loop {
            if self.stop.is_stopped() {
                return Err(ExchangeError::Shutdown);
            }
            if ring.can_push(chunk.len()) {
                break;
            }
            log::trace!(
                "Exchange full ({} of {} used), producer waiting",
                ring.available(),
                ring.capacity()
            );
            self.space_ready.wait(&mut ring);
        }

        ring.write(chunk);
        drop(ring);
        self.data_ready.notify_one();
        Ok(())
    }

    /// Pop exactly `len` samples, waiting for them if needed.
    pub fn pop(&self, len: usize) -> Result<Vec<f32>, ExchangeError> {
        let mut out = vec![0.0; len];
        self.pop_into(&mut out)?;
        Ok(out)
    }

    /// Fill `out` completely, waiting for enough samples if needed.
    pub fn pop_into(&self, out: &mut [f32]) -> Result<(), ExchangeError> {
        let mut ring = self.ring.lock();
        ring.check_request(out.len())?;
        if out.is_empty() {
            return Ok(());
        }

        loop {
            if self.stop.is_stopped() {
                return Err(ExchangeError::Shutdown);
            }
            if ring.can_pop(out.len()) {
                break;
            }
            self.data_ready.wait(&mut ring);
        }

        ring.read_into(out);
        drop(ring);
        self.space_ready.notify_one();
        Ok(())
    }

    /// Wake both sides so they observe the stop token.
    ///
    /// Taking the lock first means a waiter is either before its stop check
    /// or already parked on a condition variable.
    fn interrupt(&self) {
        let _ring = self.ring.lock();
        self.data_ready.notify_all();
        self.space_ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn ramp(range: std::ops::Range<u32>) -> Vec<f32> {
        range.map(|v| v as f32).collect()
    }

    #[test]
    fn oversized_requests_fail_without_waiting() {
        let exchange = SampleExchange::new(64, 8, StopToken::new()).unwrap();

        assert_eq!(
            exchange.push(&[0.0; 57]),
            Err(ExchangeError::Oversized {
                requested: 57,
                limit: 56
            })
        );
        assert_eq!(
            exchange.pop(100),
            Err(ExchangeError::Oversized {
                requested: 100,
                limit: 56
            })
        );
    }

    #[test]
    fn single_threaded_scenario_matches_ring_layout() {
        let exchange = SampleExchange::new(64, 8, StopToken::new()).unwrap();

        exchange.push(&ramp(0..20)).unwrap();
        assert_eq!(exchange.available(), 20);
        assert_eq!(exchange.pop(16).unwrap(), ramp(0..16));
        assert_eq!(exchange.available(), 4);

        exchange.push(&ramp(20..70)).unwrap();
        assert_eq!(exchange.pop(16).unwrap(), ramp(16..32));
        assert_eq!(exchange.pop(16).unwrap(), ramp(32..48));
        assert_eq!(exchange.pop(16).unwrap(), ramp(48..64));

        exchange.push(&ramp(70..80)).unwrap();
        assert_eq!(exchange.pop(16).unwrap(), ramp(64..80));
    }

    #[test]
    fn producer_blocks_until_consumer_frees_room() {
        let exchange = SampleExchange::new(32, 4, StopToken::new()).unwrap();
        exchange.push(&[1.0; 20]).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let producer = {
            let exchange = exchange.clone();
            let done = done.clone();
            thread::spawn(move || {
                // free = 12 < 10 + 4
                let result = exchange.push(&[2.0; 10]);
                done.store(true, Ordering::SeqCst);
                result
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));

        assert_eq!(exchange.pop(8).unwrap(), vec![1.0; 8]);
        producer.join().unwrap().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(exchange.available(), 22);
    }

    #[test]
    fn consumer_blocks_until_enough_data() {
        let exchange = SampleExchange::new(32, 4, StopToken::new()).unwrap();
        exchange.push(&[1.0; 5]).unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let consumer = {
            let exchange = exchange.clone();
            let done = done.clone();
            thread::spawn(move || {
                let result = exchange.pop(8);
                done.store(true, Ordering::SeqCst);
                result
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));

        exchange.push(&[2.0; 3]).unwrap();
        let frame = consumer.join().unwrap().unwrap();
        assert_eq!(frame, vec![1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn stop_releases_both_blocked_sides() {
        let stop = StopToken::new();
        let exchange = SampleExchange::new(32, 4, stop.clone()).unwrap();
        exchange.push(&[0.0; 20]).unwrap();

        // 20 available < 24 requested, and free 12 < 10 + 4: both sides park.
        let consumer = {
            let exchange = exchange.clone();
            thread::spawn(move || exchange.pop(24))
        };
        let producer = {
            let exchange = exchange.clone();
            thread::spawn(move || exchange.push(&[1.0; 10]))
        };

        thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        stop.stop();

        assert_eq!(producer.join().unwrap(), Err(ExchangeError::Shutdown));
        assert_eq!(consumer.join().unwrap(), Err(ExchangeError::Shutdown));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(exchange.available(), 20);
    }

    #[test]
    fn operations_after_stop_do_nothing() {
        let stop = StopToken::new();
        let exchange = SampleExchange::new(16, 2, stop.clone()).unwrap();
        exchange.push(&[1.0; 8]).unwrap();

        stop.stop();

        assert_eq!(exchange.pop(4), Err(ExchangeError::Shutdown));
        assert_eq!(exchange.push(&[1.0; 2]), Err(ExchangeError::Shutdown));
        assert_eq!(exchange.available(), 8);
    }

    #[test]
    fn random_chunking_preserves_stream() {
        const TOTAL: u32 = 200_000;
        let exchange = SampleExchange::new(1024, 16, StopToken::new()).unwrap();
        // Liveness needs push + pop sizes to fit the usable capacity together.
        let limit = exchange.limit() / 2;

        let producer = {
            let exchange = exchange.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(7);
                let mut next = 0u32;
                while next < TOTAL {
                    let len = rng.random_range(1..=limit as u32).min(TOTAL - next);
                    exchange.push(&ramp(next..next + len)).unwrap();
                    next += len;
                }
            })
        };

        let mut rng = StdRng::seed_from_u64(11);
        let mut received = Vec::with_capacity(TOTAL as usize);
        while received.len() < TOTAL as usize {
            let remaining = TOTAL as usize - received.len();
            let len = rng.random_range(1..=limit).min(remaining);
            received.extend(exchange.pop(len).unwrap());
        }

        producer.join().unwrap();
        assert_eq!(received, ramp(0..TOTAL));
        assert_eq!(exchange.available(), 0);
    }
}
