//! Federated minibatch and local gradient descent.
//!
//! Every round samples a subset of clients without replacement. Sampled
//! clients work independently on their own copy of the round-start iterate
//! and their own shard; the aggregation into the next shared iterate is the
//! only point where client results meet.

use rand::Rng;
use serde::{Deserialize, Serialize};

use dpfl_core::{
    clip_vector, mean_vector, sample_clients, FedError, MomentsAccountantNoise, Result, Vector,
};
use dpfl_data::{ClientShard, Federation};

use crate::config::{Protocol, RunConfig};
use crate::window::IterateWindow;

/// Terminal state of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// All rounds completed with bounded loss.
    Converged,
    /// An evaluated loss exceeded the threshold (or was not finite).
    Diverged,
}

/// Iterates, loss history and verdict of a run.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    /// Retained iterate window, oldest first.
    pub window: Vec<Vector>,
    /// Pooled-train objective at the window average, every `loss_freq` rounds.
    pub losses: Vec<f64>,
    /// Terminal state.
    pub status: RunStatus,
    /// Rounds executed before stopping.
    pub rounds_completed: usize,
}

impl RunOutcome {
    /// Whether the run converged.
    pub fn is_converged(&self) -> bool {
        self.status == RunStatus::Converged
    }

    /// Mean of the retained window (the reported iterate).
    pub fn averaged_iterate(&self) -> Vector {
        mean_vector(&self.window).unwrap_or_else(|| Vector::zeros(0))
    }

    /// Last entry of the loss history.
    pub fn final_loss(&self) -> Option<f64> {
        self.losses.last().copied()
    }
}

/// Runs the configured protocol over a federation.
#[derive(Clone, Debug)]
pub struct FederatedRunner<'a> {
    federation: &'a Federation,
    config: RunConfig,
}

impl<'a> FederatedRunner<'a> {
    /// Validate `config` against `federation` and build a runner.
    pub fn new(federation: &'a Federation, config: RunConfig) -> Result<Self> {
        config.validate(federation.num_clients())?;
        if federation.dim() == 0 {
            return Err(FedError::degenerate("federation has no feature columns"));
        }
        Ok(Self { federation, config })
    }

    /// Run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute all rounds, stopping early on divergence.
    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<RunOutcome> {
        let cfg = &self.config;
        let dim = self.federation.dim();
        let mut window = IterateWindow::new(cfg.avg_window, Vector::zeros(dim))?;
        let mut losses = Vec::with_capacity(cfg.rounds / cfg.loss_freq);

        for r in 0..cfg.rounds {
            let next = match cfg.protocol {
                Protocol::Minibatch => self.minibatch_round(window.latest(), rng)?,
                Protocol::Local => self.local_round(window.latest(), rng)?,
            };
            window.push(next);

            if (r + 1) % cfg.loss_freq != 0 {
                continue;
            }
            let loss = self.federation.pooled_train().objective(&window.average())?;
            losses.push(loss);
            tracing::debug!(
                protocol = %cfg.protocol,
                round = r + 1,
                rounds = cfg.rounds,
                loss,
                "evaluated averaged iterate"
            );
            if !loss.is_finite() || loss > cfg.divergence_threshold {
                tracing::warn!(
                    protocol = %cfg.protocol,
                    round = r + 1,
                    loss,
                    stepsize = cfg.stepsize,
                    clip_norm = cfg.clip_norm,
                    "loss is diverging"
                );
                return Ok(RunOutcome {
                    window: window.into_vec(),
                    losses,
                    status: RunStatus::Diverged,
                    rounds_completed: r + 1,
                });
            }
        }

        Ok(RunOutcome {
            window: window.into_vec(),
            losses,
            status: RunStatus::Converged,
            rounds_completed: cfg.rounds,
        })
    }

    /// Calibrated noise for one client, or `None` for non-private runs.
    ///
    /// Minibatch noise is calibrated to the client's own train size; local
    /// noise to the nominal shard size `⌈N/M⌉` shared by every client.
    fn client_noise(&self, client: &ClientShard) -> Result<Option<MomentsAccountantNoise>> {
        let Some(noise) = &self.config.noise else {
            return Ok(None);
        };
        let n = match self.config.protocol {
            Protocol::Minibatch => client.train.len(),
            Protocol::Local => self.federation.shard_size(),
        };
        MomentsAccountantNoise::new(
            self.federation.dim(),
            noise.epsilon,
            noise.delta_for(n),
            n,
            self.config.noisy_releases(),
            self.config.clip_norm,
            self.config.local_steps,
        )
        .map(Some)
    }

    /// One shared step from the sum of clipped (and noised) client gradients.
    fn minibatch_round<R: Rng + ?Sized>(&self, w: &Vector, rng: &mut R) -> Result<Vector> {
        let cfg = &self.config;
        let sampled = sample_clients(self.federation.num_clients(), cfg.clients_per_round, rng)?;
        let mut aggregate = Vector::zeros(w.len());
        for m in sampled {
            let client = self.federation.client(m)?;
            let mut g = client.train.minibatch_gradient(w, cfg.local_steps, rng)?;
            clip_vector(&mut g, cfg.clip_norm)?;
            if let Some(noise) = self.client_noise(client)? {
                noise.perturb(&mut g, rng)?;
            }
            aggregate += &g;
        }
        let mut next = w.clone();
        next.scaled_add(-cfg.stepsize, &aggregate);
        Ok(next)
    }

    /// Local steps on every sampled client, then the mean of client weights.
    fn local_round<R: Rng + ?Sized>(&self, w_start: &Vector, rng: &mut R) -> Result<Vector> {
        let cfg = &self.config;
        let sampled = sample_clients(self.federation.num_clients(), cfg.clients_per_round, rng)?;
        let mut client_weights = Vec::with_capacity(sampled.len());
        for m in sampled {
            let client = self.federation.client(m)?;
            let noise = self.client_noise(client)?;
            let mut w = w_start.clone();
            for _ in 0..cfg.local_steps {
                let mut g = client.train.minibatch_gradient(&w, 1, rng)?;
                clip_vector(&mut g, cfg.clip_norm)?;
                if let Some(noise) = &noise {
                    // Fresh draw on every local step.
                    noise.perturb(&mut g, rng)?;
                }
                w.scaled_add(-cfg.stepsize, &g);
            }
            client_weights.push(w);
        }
        mean_vector(&client_weights)
            .ok_or_else(|| FedError::degenerate("no client weights to average"))
    }
}

/// Run `config` over `federation` with randomness from `rng`.
pub fn run<R: Rng + ?Sized>(
    federation: &Federation,
    config: &RunConfig,
    rng: &mut R,
) -> Result<RunOutcome> {
    FederatedRunner::new(federation, config.clone())?.run(rng)
}
