//! Memoized Fibonacci numbers.

use std::sync::{Mutex, PoisonError};

use super::RandomError;

/// Largest index whose Fibonacci number fits in a u64.
pub const MAX_FIBONACCI_INDEX: i64 = 93;

/// Process-wide cache; `CACHE[i]` is F(i).
static CACHE: Mutex<Vec<u64>> = Mutex::new(Vec::new());

/// The Fibonacci number at `index`, with F(0) = 0 and F(1) = 1.
pub fn fibonacci(index: i64) -> Result<u64, RandomError> {
    if index < 0 {
        return Err(RandomError::NegativeIndex(index));
    }
    if index > MAX_FIBONACCI_INDEX {
        return Err(RandomError::Overflow(index));
    }

    let index = index as usize;
    let mut cache = CACHE.lock().unwrap_or_else(PoisonError::into_inner);
    if cache.is_empty() {
        cache.extend([0, 1]);
    }
    while cache.len() <= index {
        let n = cache.len();
        let next = cache[n - 1]
            .checked_add(cache[n - 2])
            .ok_or(RandomError::Overflow(n as i64))?;
        cache.push(next);
    }
    Ok(cache[index])
}
