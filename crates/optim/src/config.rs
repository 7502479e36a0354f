//! Run configuration for the federated engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use dpfl_core::{FedError, NoiseConfig, Result};

/// Loss above which a run is declared diverged.
pub const DEFAULT_DIVERGENCE_THRESHOLD: f64 = 5e9;

/// Default size of the iterate-averaging window.
pub const DEFAULT_AVG_WINDOW: usize = 8;

/// How clients contribute to a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// One shared step per round from summed client minibatch gradients.
    Minibatch,
    /// `K` local steps per client, then averaging of client weights.
    Local,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Minibatch => write!(f, "minibatch"),
            Protocol::Local => write!(f, "local"),
        }
    }
}

/// Parameters of a single federated run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Protocol to run.
    pub protocol: Protocol,
    /// Clients sampled (without replacement) per round.
    pub clients_per_round: usize,
    /// Minibatch size (minibatch protocol) or local step count (local protocol).
    pub local_steps: usize,
    /// Number of rounds `R`.
    pub rounds: usize,
    /// Gradient-descent stepsize.
    pub stepsize: f64,
    /// L2 clip norm applied to every client gradient.
    pub clip_norm: f64,
    /// Evaluate the loss every `loss_freq` rounds.
    pub loss_freq: usize,
    /// Iterate-averaging window size.
    #[serde(default = "default_avg_window")]
    pub avg_window: usize,
    /// Loss above which the run stops as diverged.
    #[serde(default = "default_divergence_threshold")]
    pub divergence_threshold: f64,
    /// Privacy budget; `None` runs without noise.
    #[serde(default)]
    pub noise: Option<NoiseConfig>,
}

fn default_avg_window() -> usize {
    DEFAULT_AVG_WINDOW
}

fn default_divergence_threshold() -> f64 {
    DEFAULT_DIVERGENCE_THRESHOLD
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Minibatch,
            clients_per_round: 5,
            local_steps: 1,
            rounds: 35,
            stepsize: 0.01,
            clip_norm: 100.0,
            loss_freq: 5,
            avg_window: DEFAULT_AVG_WINDOW,
            divergence_threshold: DEFAULT_DIVERGENCE_THRESHOLD,
            noise: None,
        }
    }
}

impl RunConfig {
    /// Create a config for `protocol` with default settings.
    pub fn new(protocol: Protocol) -> Self {
        Self {
            protocol,
            ..Self::default()
        }
    }

    /// Set the clients sampled per round.
    pub fn with_clients_per_round(mut self, clients_per_round: usize) -> Self {
        self.clients_per_round = clients_per_round;
        self
    }

    /// Set the minibatch size / local step count.
    pub fn with_local_steps(mut self, local_steps: usize) -> Self {
        self.local_steps = local_steps;
        self
    }

    /// Set the number of rounds.
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }

    /// Set the stepsize.
    pub fn with_stepsize(mut self, stepsize: f64) -> Self {
        self.stepsize = stepsize;
        self
    }

    /// Set the clip norm.
    pub fn with_clip_norm(mut self, clip_norm: f64) -> Self {
        self.clip_norm = clip_norm;
        self
    }

    /// Set the loss-evaluation frequency.
    pub fn with_loss_freq(mut self, loss_freq: usize) -> Self {
        self.loss_freq = loss_freq;
        self
    }

    /// Set the averaging window size.
    pub fn with_avg_window(mut self, avg_window: usize) -> Self {
        self.avg_window = avg_window;
        self
    }

    /// Set the divergence threshold.
    pub fn with_divergence_threshold(mut self, threshold: f64) -> Self {
        self.divergence_threshold = threshold;
        self
    }

    /// Enable calibrated noise.
    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = Some(noise);
        self
    }

    /// Disable noise.
    pub fn without_noise(mut self) -> Self {
        self.noise = None;
        self
    }

    /// Noisy releases each client makes over a run.
    ///
    /// Minibatch clients release once per round; local clients release
    /// once per local step.
    pub fn noisy_releases(&self) -> usize {
        match self.protocol {
            Protocol::Minibatch => self.rounds,
            Protocol::Local => self.rounds.saturating_mul(self.local_steps),
        }
    }

    /// Check the config for a federation of `num_clients` clients.
    pub fn validate(&self, num_clients: usize) -> Result<()> {
        if self.clients_per_round == 0 {
            return Err(FedError::invalid("clients per round must be positive"));
        }
        if self.clients_per_round > num_clients {
            return Err(FedError::degenerate(format!(
                "{} clients per round but only {num_clients} clients",
                self.clients_per_round
            )));
        }
        if self.local_steps == 0 {
            return Err(FedError::invalid("local steps must be positive"));
        }
        if self.rounds == 0 {
            return Err(FedError::invalid("rounds must be positive"));
        }
        if self.loss_freq == 0 {
            return Err(FedError::invalid("loss frequency must be positive"));
        }
        if self.avg_window == 0 {
            return Err(FedError::invalid("averaging window must be positive"));
        }
        if !self.stepsize.is_finite() || self.stepsize <= 0.0 {
            return Err(FedError::invalid(format!(
                "stepsize must be positive and finite, got {}",
                self.stepsize
            )));
        }
        if self.clip_norm.is_nan() || self.clip_norm <= 0.0 {
            return Err(FedError::invalid(format!(
                "clip norm must be positive, got {}",
                self.clip_norm
            )));
        }
        if self.divergence_threshold.is_nan() || self.divergence_threshold <= 0.0 {
            return Err(FedError::invalid("divergence threshold must be positive"));
        }
        if let Some(noise) = &self.noise {
            noise.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(RunConfig::default().validate(10).is_ok());
        assert!(RunConfig::new(Protocol::Local).validate(5).is_ok());
    }

    #[test]
    fn too_many_clients_per_round_is_degenerate() {
        let cfg = RunConfig::default().with_clients_per_round(11);
        assert!(matches!(cfg.validate(10), Err(FedError::DegenerateInput { .. })));
    }

    #[test]
    fn rejects_invalid_values() {
        let base = RunConfig::default();
        assert!(base.clone().with_stepsize(0.0).validate(10).is_err());
        assert!(base.clone().with_stepsize(f64::NAN).validate(10).is_err());
        assert!(base.clone().with_clip_norm(0.0).validate(10).is_err());
        assert!(base.clone().with_rounds(0).validate(10).is_err());
        assert!(base.clone().with_loss_freq(0).validate(10).is_err());
        assert!(base.clone().with_avg_window(0).validate(10).is_err());
        assert!(base.clone().with_local_steps(0).validate(10).is_err());
        assert!(base
            .clone()
            .with_noise(NoiseConfig::new(1.0).with_delta(0.0))
            .validate(10)
            .is_err());
        assert!(base.with_clip_norm(f64::INFINITY).validate(10).is_ok());
    }

    #[test]
    fn noisy_releases_by_protocol() {
        let mb = RunConfig::new(Protocol::Minibatch).with_rounds(35).with_local_steps(4);
        let local = mb.clone().with_rounds(35);
        assert_eq!(mb.noisy_releases(), 35);
        assert_eq!(
            RunConfig { protocol: Protocol::Local, ..local }.noisy_releases(),
            140
        );
    }

    #[test]
    fn parses_from_json_with_defaults() {
        let cfg: RunConfig = serde_json::from_str(
            r#"{"protocol":"local","clients_per_round":2,"local_steps":3,"rounds":10,
                "stepsize":0.1,"clip_norm":5.0,"loss_freq":2,"noise":{"epsilon":1.0}}"#,
        )
        .unwrap();
        assert_eq!(cfg.protocol, Protocol::Local);
        assert_eq!(cfg.avg_window, DEFAULT_AVG_WINDOW);
        assert_eq!(cfg.noise, Some(NoiseConfig::new(1.0)));
    }
}
