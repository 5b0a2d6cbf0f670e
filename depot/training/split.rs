use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Row indices of the train and evaluation partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    /// Rows used to fit.
    pub train: Vec<usize>,
    /// Held-out rows used to score.
    pub test: Vec<usize>,
}

/// Shuffles `0..rows` with a seeded ChaCha stream and holds out
/// `ceil(rows * test_size)` of them. Same inputs, same partitions.
#[must_use]
pub fn train_test_split(rows: usize, test_size: f64, seed: u64) -> Split {
    let mut order: Vec<usize> = (0..rows).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));
    let test_rows = test_count(rows, test_size);
    let train = order.split_off(test_rows);
    Split { train, test: order }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn test_count(rows: usize, test_size: f64) -> usize {
    let wanted = (rows as f64 * test_size.clamp(0.0, 1.0)).ceil();
    (wanted as usize).min(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_every_row_once() {
        let split = train_test_split(1000, 0.2, 42);
        assert_eq!(split.test.len(), 200);
        assert_eq!(split.train.len(), 800);
        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn seed_fixes_the_partition() {
        assert_eq!(train_test_split(50, 0.3, 7), train_test_split(50, 0.3, 7));
        assert_ne!(train_test_split(50, 0.3, 7).test, train_test_split(50, 0.3, 8).test);
    }

    #[test]
    fn small_inputs_round_the_holdout_up() {
        assert_eq!(train_test_split(3, 0.2, 42).test.len(), 1);
        assert_eq!(train_test_split(1, 0.2, 42).train.len(), 0);
        assert!(train_test_split(0, 0.2, 42).test.is_empty());
    }
}
