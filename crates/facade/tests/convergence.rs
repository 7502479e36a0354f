use dpfl::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// `y = 1 + 3·x₁ − 2·x₂ + N(0, 0.01)` split over ten label-sorted clients.
fn federation(seed: u64) -> Federation {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let ds = linear_dataset(500, &[3.0, -2.0], 1.0, 0.1, &mut rng).unwrap();
    partition(&ds, &PartitionConfig::new(10), &mut rng).unwrap()
}

fn base_config(protocol: Protocol) -> RunConfig {
    RunConfig::new(protocol)
        .with_clients_per_round(5)
        .with_local_steps(1)
        .with_rounds(35)
        .with_stepsize(0.05)
        .with_clip_norm(100.0)
}

fn assert_near_truth(w: &Vector, tol: f64) {
    let truth = [1.0, 3.0, -2.0];
    for (got, want) in w.iter().zip(truth) {
        assert!((got - want).abs() < tol, "weights {w} not within {tol} of {truth:?}");
    }
}

#[test]
fn minibatch_recovers_the_generating_weights() {
    for seed in [1, 2, 3] {
        let fed = federation(seed);
        let mut rng = ChaCha8Rng::seed_from_u64(seed + 100);
        let outcome = run(&fed, &base_config(Protocol::Minibatch), &mut rng).unwrap();
        assert_eq!(outcome.status, RunStatus::Converged);
        assert_eq!(outcome.losses.len(), 7);
        assert_near_truth(&outcome.averaged_iterate(), 0.2);
    }
}

#[test]
fn local_steps_recover_the_generating_weights() {
    let fed = federation(4);
    let mut rng = ChaCha8Rng::seed_from_u64(44);
    let cfg = base_config(Protocol::Local).with_local_steps(5);
    let outcome = run(&fed, &cfg, &mut rng).unwrap();
    assert!(outcome.is_converged());
    assert_near_truth(&outcome.averaged_iterate(), 0.2);
}

#[test]
fn excess_risk_is_small_against_the_newton_optimum() {
    let fed = federation(5);
    let optimum = solve_optimum(fed.pooled_train()).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(55);
    let outcome = run(&fed, &base_config(Protocol::Minibatch), &mut rng).unwrap();
    let excess = outcome.final_loss().unwrap() - optimum.optimal_value;
    assert!(excess >= -1e-9);
    assert!(excess < 0.05, "excess risk {excess}");
}

#[test]
fn huge_stepsize_diverges_early() {
    let fed = federation(6);
    let mut rng = ChaCha8Rng::seed_from_u64(66);
    let cfg = base_config(Protocol::Minibatch)
        .with_stepsize(100.0)
        .with_clip_norm(1e32);
    let outcome = run(&fed, &cfg, &mut rng).unwrap();
    assert_eq!(outcome.status, RunStatus::Diverged);
    assert!(outcome.losses.len() < cfg.rounds / cfg.loss_freq);
    assert!(outcome.rounds_completed < cfg.rounds);
}

#[test]
fn same_seed_gives_the_same_run() {
    let fed = federation(7);
    let cfg = base_config(Protocol::Local)
        .with_local_steps(3)
        .with_clip_norm(5.0)
        .with_noise(NoiseConfig::new(1.0));
    let a = run(&fed, &cfg, &mut ChaCha8Rng::seed_from_u64(8)).unwrap();
    let b = run(&fed, &cfg, &mut ChaCha8Rng::seed_from_u64(8)).unwrap();
    assert_eq!(a, b);
}
