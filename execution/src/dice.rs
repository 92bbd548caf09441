use ludo_types::DICE_FACES;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Source of die rolls for a match.
///
/// Injected into the controller so tests and replays can fix the sequence of rolls.
pub trait DiceSource: Send {
    /// Returns a value in `1..=DICE_FACES`.
    fn roll(&mut self) -> u8;
}

/// ChaCha20-backed dice, reproducible from a `u64` seed.
#[derive(Clone, Debug)]
pub struct SeededDice {
    rng: ChaCha20Rng,
}

impl SeededDice {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    /// Dice seeded from the thread-local entropy source.
    pub fn random() -> Self {
        Self::new(rand::random())
    }
}

impl DiceSource for SeededDice {
    fn roll(&mut self) -> u8 {
        self.rng.gen_range(1..=DICE_FACES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolls_stay_on_the_die() {
        let mut dice = SeededDice::new(7);
        let mut seen = [false; DICE_FACES as usize];
        for _ in 0..600 {
            let value = dice.roll();
            assert!((1..=DICE_FACES).contains(&value));
            seen[value as usize - 1] = true;
        }
        assert!(seen.iter().all(|face| *face));
    }

    #[test]
    fn same_seed_same_rolls() {
        let mut a = SeededDice::new(42);
        let mut b = SeededDice::new(42);
        let a: Vec<u8> = (0..32).map(|_| a.roll()).collect();
        let b: Vec<u8> = (0..32).map(|_| b.roll()).collect();
        assert_eq!(a, b);
    }
}
