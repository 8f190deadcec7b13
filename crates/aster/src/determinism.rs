//! Record/replay source of retry jitter.
//!
//! A workflow draws its backoff jitter from a [`DeterminismContext`] so two
//! runs over identical inputs observe identical delays. In record mode every
//! draw comes from a seeded RNG and is appended to a log; in replay mode
//! draws are consumed from the log by an advancing cursor. Exhausting the
//! cursor mid-replay is a programming error and panics.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Record,
    Replay,
}

/// Serialized source of jitter randomness; one per run, shared by every
/// workflow and every retry within it.
#[derive(Debug)]
pub(crate) struct DeterminismContext {
    rng: ChaCha8Rng,
    log: Vec<u64>,
    cursor: usize,
    mode: Mode,
}

impl DeterminismContext {
    /// Record mode: draws are generated from `seed` and logged.
    pub fn record(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            log: Vec::new(),
            cursor: 0,
            mode: Mode::Record,
        }
    }

    /// Replay mode: draws are consumed from a previously recorded log.
    pub fn replay(log: Vec<u64>) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(0),
            log,
            cursor: 0,
            mode: Mode::Replay,
        }
    }

    /// Draws the next jitter value in milliseconds, uniform in
    /// `[0, bound_ms)`. A zero bound yields zero without consuming a draw,
    /// so zero-base retry policies behave identically in both modes.
    ///
    /// # Panics
    /// Panics if the replay cursor is exhausted: the caller is replaying a
    /// log recorded from a different execution.
    pub fn next_jitter_ms(&mut self, bound_ms: u64) -> u64 {
        if bound_ms == 0 {
            return 0;
        }
        match self.mode {
            Mode::Record => {
                let jitter = self.rng.gen_range(0..bound_ms);
                self.log.push(jitter);
                jitter
            }
            Mode::Replay => {
                let jitter = *self
                    .log
                    .get(self.cursor)
                    .expect("determinism log exhausted during replay");
                self.cursor += 1;
                jitter
            }
        }
    }

    /// The jitter values drawn (record mode) or supplied (replay mode).
    pub fn log(&self) -> &[u64] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_replay_produces_identical_draws() {
        let mut recorder = DeterminismContext::record(7);
        let first: Vec<u64> = (0..8).map(|_| recorder.next_jitter_ms(50)).collect();
        let mut replayer = DeterminismContext::replay(recorder.log().to_vec());
        let second: Vec<u64> = (0..8).map(|_| replayer.next_jitter_ms(50)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_bound_skips_the_log() {
        let mut ctx = DeterminismContext::record(1);
        assert_eq!(ctx.next_jitter_ms(0), 0);
        assert!(ctx.log().is_empty());
    }

    #[test]
    #[should_panic(expected = "determinism log exhausted")]
    fn replay_exhaustion_panics() {
        let mut ctx = DeterminismContext::replay(vec![3]);
        let _ = ctx.next_jitter_ms(10);
        let _ = ctx.next_jitter_ms(10);
    }
}
