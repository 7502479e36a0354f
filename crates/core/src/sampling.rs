//! Client and minibatch sampling.

use rand::seq::index;
use rand::Rng;

use crate::error::{FedError, Result};

/// Sample `available` distinct client indices out of `num_clients`.
///
/// Models intermittent availability: only the returned clients
/// participate in a round.
pub fn sample_clients<R: Rng + ?Sized>(
    num_clients: usize,
    available: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if available == 0 {
        return Err(FedError::invalid("clients per round must be positive"));
    }
    if available > num_clients {
        return Err(FedError::degenerate(format!(
            "cannot sample {available} clients out of {num_clients}"
        )));
    }
    Ok(index::sample(rng, num_clients, available).into_vec())
}

/// Draw `batch_size` row indices in `0..n` uniformly with replacement.
pub fn minibatch_indices<R: Rng + ?Sized>(
    n: usize,
    batch_size: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if n == 0 {
        return Err(FedError::degenerate("cannot draw a minibatch from an empty shard"));
    }
    if batch_size == 0 {
        return Err(FedError::invalid("minibatch size must be positive"));
    }
    Ok((0..batch_size).map(|_| rng.gen_range(0..n)).collect())
}
