//! Atomic reference state of one object instance

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Why a reference operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefError {
    /// The reference is still floating; it has to be claimed first
    Floating,
    /// The count already reached zero
    Destroyed,
}

/// Strong count plus floating flag
///
/// A floating object has count 1 and no owner. Claiming clears the flag with
/// a single compare-and-set, so of two racing claimers exactly one wins and
/// the count is left untouched.
#[derive(Debug)]
pub struct RefState {
    count: AtomicU32,
    floating: AtomicBool,
}

impl RefState {
    pub fn new(floating: bool) -> Self {
        Self {
            count: AtomicU32::new(1),
            floating: AtomicBool::new(floating),
        }
    }

    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_floating(&self) -> bool {
        self.floating.load(Ordering::Acquire)
    }

    /// Clear the floating flag; true only for the caller that cleared it
    pub fn claim(&self) -> bool {
        self.floating
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Add a strong reference, refusing destroyed or floating objects
    pub fn acquire(&self) -> Result<u32, RefError> {
        if self.is_floating() {
            return Err(RefError::Floating);
        }
        loop {
            let current = self.count.load(Ordering::Relaxed);
            if current == 0 {
                return Err(RefError::Destroyed);
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(_) => continue,
            }
        }
    }

    /// Drop a strong reference; returns the remaining count
    pub fn release(&self) -> Result<u32, RefError> {
        if self.is_floating() {
            return Err(RefError::Floating);
        }
        loop {
            let current = self.count.load(Ordering::Relaxed);
            if current == 0 {
                return Err(RefError::Destroyed);
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(current - 1),
                Err(_) => continue,
            }
        }
    }

    /// Claim if floating, otherwise add a reference
    pub fn sink(&self) -> Result<u32, RefError> {
        if self.claim() {
            Ok(self.count())
        } else {
            self.acquire()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_claim_once() {
        let state = RefState::new(true);
        assert!(state.claim());
        assert!(!state.claim());
        assert_eq!(state.count(), 1);
        assert!(!state.is_floating());
    }

    #[test]
    fn test_racing_claims_single_winner() {
        for _ in 0..64 {
            let state = Arc::new(RefState::new(true));
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let state = Arc::clone(&state);
                    thread::spawn(move || state.claim())
                })
                .collect();
            let wins = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(wins, 1);
            assert_eq!(state.count(), 1);
        }
    }

    #[test]
    fn test_floating_refuses_ref_and_unref() {
        let state = RefState::new(true);
        assert_eq!(state.acquire(), Err(RefError::Floating));
        assert_eq!(state.release(), Err(RefError::Floating));
    }

    #[test]
    fn test_release_to_zero_then_refuse() {
        let state = RefState::new(false);
        assert_eq!(state.acquire(), Ok(2));
        assert_eq!(state.release(), Ok(1));
        assert_eq!(state.release(), Ok(0));
        assert_eq!(state.release(), Err(RefError::Destroyed));
        assert_eq!(state.acquire(), Err(RefError::Destroyed));
    }

    #[test]
    fn test_concurrent_ref_unref_balances() {
        let state = Arc::new(RefState::new(false));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        state.acquire().unwrap();
                        state.release().unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(state.count(), 1);
    }

    #[test]
    fn test_sink() {
        let floating = RefState::new(true);
        assert_eq!(floating.sink(), Ok(1));
        assert_eq!(floating.sink(), Ok(2));
    }
}
