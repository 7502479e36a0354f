//! Label-sorted client partitioning.
//!
//! Rows are sorted by label before slicing, so each client sees a narrow
//! band of the target: the shards are deliberately non-i.i.d. Each shard is
//! then split into train and test rows and its continuous columns are
//! standardized with statistics from that client's train rows only. Test
//! rows reuse the train statistics, modelling local normalization on each
//! client.

use ndarray::{concatenate, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use dpfl_core::{FedError, LeastSquares, Matrix, Result, Vector};

use crate::dataset::{Dataset, INSURANCE_CONTINUOUS};

/// How to split a dataset across clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PartitionConfig {
    /// Number of clients `M`.
    pub num_clients: usize,
    /// Fraction of each shard held out for testing.
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    /// Raw column indices standardized per client.
    #[serde(default)]
    pub standardize: Vec<usize>,
    /// Whether to prepend a constant bias column.
    #[serde(default = "default_add_intercept")]
    pub add_intercept: bool,
}

fn default_test_fraction() -> f64 {
    0.2
}

fn default_add_intercept() -> bool {
    true
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            num_clients: 10,
            test_fraction: default_test_fraction(),
            standardize: Vec::new(),
            add_intercept: default_add_intercept(),
        }
    }
}

impl PartitionConfig {
    /// Create a config for `num_clients` clients with default settings.
    pub fn new(num_clients: usize) -> Self {
        Self {
            num_clients,
            ..Self::default()
        }
    }

    /// Config for the encoded insurance data (standardizes age and bmi).
    pub fn insurance(num_clients: usize) -> Self {
        Self::new(num_clients).with_standardize(INSURANCE_CONTINUOUS.to_vec())
    }

    /// Set the held-out test fraction.
    pub fn with_test_fraction(mut self, test_fraction: f64) -> Self {
        self.test_fraction = test_fraction;
        self
    }

    /// Set the columns to standardize.
    pub fn with_standardize(mut self, columns: Vec<usize>) -> Self {
        self.standardize = columns;
        self
    }

    /// Toggle the bias column.
    pub fn with_intercept(mut self, add_intercept: bool) -> Self {
        self.add_intercept = add_intercept;
        self
    }

    /// Check the config against a dataset with `num_features` raw columns.
    pub fn validate(&self, num_rows: usize, num_features: usize) -> Result<()> {
        if self.num_clients == 0 {
            return Err(FedError::degenerate("number of clients must be positive"));
        }
        if self.num_clients > num_rows {
            return Err(FedError::degenerate(format!(
                "{} clients but only {num_rows} rows",
                self.num_clients
            )));
        }
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(FedError::invalid(format!(
                "test fraction must lie in [0, 1), got {}",
                self.test_fraction
            )));
        }
        if let Some(&col) = self.standardize.iter().find(|&&c| c >= num_features) {
            return Err(FedError::invalid(format!(
                "standardized column {col} out of range for {num_features} features"
            )));
        }
        Ok(())
    }
}

/// Affine transform applied to one standardized column.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Raw column index.
    pub column: usize,
    /// Train mean.
    pub mean: f64,
    /// Train sample standard deviation.
    pub std: f64,
}

/// One client's train and test data.
#[derive(Clone, Debug)]
pub struct ClientShard {
    /// Client index in `0..M`.
    pub id: usize,
    /// Standardized train data.
    pub train: LeastSquares,
    /// Test data standardized with the train statistics.
    pub test: LeastSquares,
    /// Dataset row indices of the train rows.
    pub train_rows: Vec<usize>,
    /// Dataset row indices of the test rows.
    pub test_rows: Vec<usize>,
    /// Statistics used for each standardized column.
    pub standardization: Vec<ColumnStats>,
}

impl ClientShard {
    /// Total rows owned by the client.
    pub fn len(&self) -> usize {
        self.train_rows.len() + self.test_rows.len()
    }

    /// Always false; empty shards are rejected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A dataset split across clients, plus the pooled train and test sets.
#[derive(Clone, Debug)]
pub struct Federation {
    clients: Vec<ClientShard>,
    pooled_train: LeastSquares,
    pooled_test: LeastSquares,
    shard_size: usize,
}

impl Federation {
    /// Assemble a federation from client shards.
    pub fn from_clients(clients: Vec<ClientShard>) -> Result<Self> {
        let first = clients
            .first()
            .ok_or_else(|| FedError::degenerate("federation needs at least one client"))?;
        let dim = first.train.num_features();
        let shard_size = clients.iter().map(ClientShard::len).max().unwrap_or(0);
        for c in &clients {
            if c.train.num_features() != dim || c.test.num_features() != dim {
                return Err(FedError::shape(
                    format!("client {} feature columns", c.id),
                    dim,
                    c.train.num_features(),
                ));
            }
            if c.train.is_empty() {
                return Err(FedError::degenerate(format!(
                    "client {} has no train rows",
                    c.id
                )));
            }
        }
        let pooled_train = pool(clients.iter().map(|c| &c.train))?;
        let pooled_test = pool(clients.iter().map(|c| &c.test))?;
        Ok(Self {
            clients,
            pooled_train,
            pooled_test,
            shard_size,
        })
    }

    /// All clients in index order.
    pub fn clients(&self) -> &[ClientShard] {
        &self.clients
    }

    /// One client.
    pub fn client(&self, m: usize) -> Result<&ClientShard> {
        self.clients.get(m).ok_or_else(|| {
            FedError::invalid(format!(
                "client {m} out of range for {} clients",
                self.clients.len()
            ))
        })
    }

    /// Number of clients `M`.
    pub fn num_clients(&self) -> usize {
        self.clients.len()
    }

    /// Parameter dimension (including the bias column if present).
    pub fn dim(&self) -> usize {
        self.pooled_train.num_features()
    }

    /// Nominal shard size `⌈n/M⌉`.
    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    /// Concatenated train data of every client.
    pub fn pooled_train(&self) -> &LeastSquares {
        &self.pooled_train
    }

    /// Concatenated test data of every client.
    pub fn pooled_test(&self) -> &LeastSquares {
        &self.pooled_test
    }
}

fn pool<'a, I>(parts: I) -> Result<LeastSquares>
where
    I: Iterator<Item = &'a LeastSquares>,
{
    let (xs, ys): (Vec<_>, Vec<_>) = parts.map(|p| (p.features().view(), p.labels().view())).unzip();
    let x = concatenate(Axis(0), &xs).map_err(|e| FedError::invalid(format!("pooling features: {e}")))?;
    let y = concatenate(Axis(0), &ys).map_err(|e| FedError::invalid(format!("pooling labels: {e}")))?;
    LeastSquares::new(x, y)
}

fn design_matrix(dataset: &Dataset, rows: &[usize], add_intercept: bool) -> Result<Matrix> {
    let raw = dataset.features().select(Axis(0), rows);
    if !add_intercept {
        return Ok(raw);
    }
    let ones = Matrix::ones((rows.len(), 1));
    concatenate(Axis(1), &[ones.view(), raw.view()])
        .map_err(|e| FedError::invalid(format!("adding intercept: {e}")))
}

/// `⌈len · fraction⌉`, ignoring rounding noise in the product.
fn held_out_count(len: usize, fraction: f64) -> usize {
    let raw = len as f64 * fraction;
    let count = (raw - 1e-9).ceil().max(0.0) as usize;
    count.min(len)
}

fn column_stats(client: usize, column: usize, values: &[f64]) -> Result<ColumnStats> {
    if values.len() < 2 {
        return Err(FedError::degenerate(format!(
            "client {client}: need at least 2 train rows to standardize column {column}"
        )));
    }
    let mean = values.mean();
    let std = values.std_dev();
    if !std.is_finite() || std <= 0.0 {
        return Err(FedError::degenerate(format!(
            "client {client}: column {column} has zero variance on its train rows"
        )));
    }
    Ok(ColumnStats { column, mean, std })
}

/// Split `dataset` into label-sorted client shards.
///
/// Shard `i` holds sorted positions `[i·⌈n/M⌉, (i+1)·⌈n/M⌉)`, clamped to
/// `n`. The train/test split of each shard is drawn from `rng`.
pub fn partition<R: Rng + ?Sized>(
    dataset: &Dataset,
    config: &PartitionConfig,
    rng: &mut R,
) -> Result<Federation> {
    let n = dataset.len();
    config.validate(n, dataset.num_features())?;

    let labels = dataset.labels();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| labels[a].total_cmp(&labels[b]));

    let num_clients = config.num_clients;
    let shard_size = (n + num_clients - 1) / num_clients;
    let offset = usize::from(config.add_intercept);

    let mut clients = Vec::with_capacity(num_clients);
    for id in 0..num_clients {
        let start = (id * shard_size).min(n);
        let end = ((id + 1) * shard_size).min(n);
        if start >= end {
            return Err(FedError::degenerate(format!(
                "client {id} receives no rows ({n} rows over {num_clients} clients)"
            )));
        }

        let mut rows = order[start..end].to_vec();
        rows.shuffle(rng);
        let n_test = held_out_count(rows.len(), config.test_fraction);
        let train_rows = rows.split_off(n_test);
        let test_rows = rows;
        if train_rows.is_empty() {
            return Err(FedError::degenerate(format!(
                "client {id} has no train rows after holding out {n_test} test rows"
            )));
        }

        let mut train_x = design_matrix(dataset, &train_rows, config.add_intercept)?;
        let mut test_x = design_matrix(dataset, &test_rows, config.add_intercept)?;

        let mut standardization = Vec::with_capacity(config.standardize.len());
        for &column in &config.standardize {
            let col = column + offset;
            let values: Vec<f64> = train_x.column(col).to_vec();
            let stats = column_stats(id, column, &values)?;
            train_x
                .column_mut(col)
                .mapv_inplace(|v| (v - stats.mean) / stats.std);
            test_x
                .column_mut(col)
                .mapv_inplace(|v| (v - stats.mean) / stats.std);
            standardization.push(stats);
        }

        let train_y: Vector = labels.select(Axis(0), &train_rows);
        let test_y: Vector = labels.select(Axis(0), &test_rows);
        tracing::debug!(
            client = id,
            train = train_rows.len(),
            test = test_rows.len(),
            "partitioned client shard"
        );

        clients.push(ClientShard {
            id,
            train: LeastSquares::new(train_x, train_y)?,
            test: LeastSquares::new(test_x, test_y)?,
            train_rows,
            test_rows,
            standardization,
        });
    }

    let mut federation = Federation::from_clients(clients)?;
    federation.shard_size = shard_size;
    Ok(federation)
}
