//! Deterministic synthetic price feed.
//!
//! The simulator satisfies the same query contract as the live store plus
//! fetch collaborator, which lets the quote protocol be exercised without
//! network access. `simulate` is a pure function of `(config, query)`: the
//! RNG and momentum are reset at the start of every call, so identical
//! inputs always produce an identical trajectory.

use async_trait::async_trait;

use crate::error::{OracleError, Result};
use crate::models::{now, PricePoint, StopPriceData, StopPriceQuery, StopPriceSource};

/// Simulator parameters. Immutable after construction, validated once.
#[derive(Debug, Clone)]
pub struct PriceGenConfig {
    /// Starting timestamp of the synthetic trajectory.
    pub initial_stamp: u64,
    /// Starting price.
    pub initial_price: f64,
    /// Lower price boundary.
    pub min_price: f64,
    /// Upper price boundary.
    pub max_price: f64,
    /// Base volatility as a fraction of price (0-1).
    pub volatility: f64,
    /// Seconds per simulation step.
    pub time_step: u64,
    /// Drift strength per step.
    pub trend_strength: f64,
    /// How much the previous random move carries into the next step.
    pub momentum_factor: f64,
    /// Chance of a sudden shock per step (0-1).
    pub shock_probability: f64,
    /// Max shock size as a fraction of price.
    pub shock_magnitude: f64,
    /// Steps between regular crashes.
    pub crash_interval: u64,
    /// Crash size as a fraction of price (0-1).
    pub crash_magnitude: f64,
}

impl Default for PriceGenConfig {
    fn default() -> Self {
        Self {
            initial_stamp: now().saturating_sub(100_000),
            initial_price: 50_000.0,
            min_price: 25_000.0,
            max_price: 200_000.0,
            volatility: 0.03,
            time_step: 5,
            trend_strength: 0.0005,
            momentum_factor: 0.3,
            shock_probability: 0.01,
            shock_magnitude: 0.1,
            crash_interval: 100,
            crash_magnitude: 0.15,
        }
    }
}

/// 32-bit xorshift generator. Seeded from the trajectory's initial stamp.
struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    fn new(seed: u32) -> Self {
        // Xorshift cannot leave a zero state.
        let state = if seed == 0 { 0x9E37_79B9 } else { seed };
        Self { state }
    }

    /// Uniform value in [0, 1].
    fn next_f64(&mut self) -> f64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x as f64 / u32::MAX as f64
    }
}

pub struct PriceSimulator {
    config: PriceGenConfig,
}

impl PriceSimulator {
    pub fn new(config: PriceGenConfig) -> Result<Self> {
        validate_config(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PriceGenConfig {
        &self.config
    }

    /// Run the synthetic trajectory and answer a threshold-crossing query.
    ///
    /// Tracks the point whose time is closest to `start_stamp` (first minimal
    /// difference wins) as the start point, and the first point strictly
    /// after `start_stamp` with `price <= thold_price` as the stop point.
    pub fn simulate(&self, query: &StopPriceQuery) -> Result<StopPriceData> {
        let cfg = &self.config;
        let curr_stamp = query.curr_stamp.unwrap_or_else(now);
        let start_stamp = query.start_stamp;

        if start_stamp < cfg.initial_stamp {
            return Err(OracleError::Validation(format!(
                "start stamp {start_stamp} precedes trajectory start {}",
                cfg.initial_stamp
            )));
        }
        if curr_stamp < cfg.initial_stamp {
            return Err(OracleError::Validation(format!(
                "current stamp {curr_stamp} precedes trajectory start {}",
                cfg.initial_stamp
            )));
        }
        if start_stamp > curr_stamp {
            return Err(OracleError::Validation(format!(
                "start stamp {start_stamp} is after current stamp {curr_stamp}"
            )));
        }

        let mut walk = Walk::new(cfg);
        let steps = (curr_stamp - cfg.initial_stamp) / cfg.time_step;

        let mut min_diff = u64::MAX;
        let mut start_point: Option<PricePoint> = None;
        let mut stop_point: Option<PricePoint> = None;
        let mut point = PricePoint { price: 0, stamp: 0 };

        for i in 0..=steps {
            let stamp = cfg.initial_stamp + i * cfg.time_step;
            point = PricePoint {
                price: walk.next_price(i).round() as u64,
                stamp,
            };

            let diff = stamp.abs_diff(start_stamp);
            if diff < min_diff {
                min_diff = diff;
                start_point = Some(point);
            }

            if stop_point.is_none() && stamp > start_stamp && point.price <= query.thold_price {
                stop_point = Some(point);
            }
        }

        // The walk always covers at least one step (i = 0).
        let start_point = start_point
            .ok_or_else(|| OracleError::Internal("simulation produced no start point".into()))?;

        Ok(StopPriceData {
            close_price: point.price,
            close_stamp: point.stamp,
            start_price: start_point.price,
            start_stamp: start_point.stamp,
            stop_price: stop_point.map(|p| p.price),
            stop_stamp: stop_point.map(|p| p.stamp),
        })
    }

    /// The trajectory point nearest to `stamp`. Used by the simulated fetcher.
    pub fn point_at(&self, stamp: u64) -> Result<PricePoint> {
        let cfg = &self.config;
        if stamp < cfg.initial_stamp {
            return Err(OracleError::Validation(format!(
                "stamp {stamp} precedes trajectory start {}",
                cfg.initial_stamp
            )));
        }

        let mut walk = Walk::new(cfg);
        let steps = (stamp - cfg.initial_stamp) / cfg.time_step;
        let mut price = 0u64;
        for i in 0..=steps {
            price = walk.next_price(i).round() as u64;
        }
        Ok(PricePoint {
            price,
            stamp: cfg.initial_stamp + steps * cfg.time_step,
        })
    }

    /// All trajectory points with stamps in `[start, end]`.
    pub fn trajectory(&self, start_stamp: u64, end_stamp: u64) -> Result<Vec<PricePoint>> {
        let cfg = &self.config;
        if start_stamp > end_stamp {
            return Err(OracleError::Validation(format!(
                "start stamp {start_stamp} is after end stamp {end_stamp}"
            )));
        }
        if end_stamp < cfg.initial_stamp {
            return Ok(Vec::new());
        }

        let mut walk = Walk::new(cfg);
        let steps = (end_stamp - cfg.initial_stamp) / cfg.time_step;
        let mut points = Vec::new();
        for i in 0..=steps {
            let stamp = cfg.initial_stamp + i * cfg.time_step;
            let price = walk.next_price(i).round() as u64;
            if stamp >= start_stamp {
                points.push(PricePoint { price, stamp });
            }
        }
        Ok(points)
    }
}

#[async_trait]
impl StopPriceSource for PriceSimulator {
    async fn get_stop_price(&self, query: &StopPriceQuery) -> Result<StopPriceData> {
        self.simulate(query)
    }
}

/// One pass over the trajectory: RNG and momentum owned per walk.
struct Walk<'a> {
    cfg: &'a PriceGenConfig,
    rng: Xorshift32,
    momentum: f64,
    price: f64,
}

impl<'a> Walk<'a> {
    fn new(cfg: &'a PriceGenConfig) -> Self {
        Self {
            cfg,
            rng: Xorshift32::new(cfg.initial_stamp as u32),
            momentum: 0.0,
            price: cfg.initial_price,
        }
    }

    fn next_price(&mut self, step: u64) -> f64 {
        let cfg = self.cfg;
        let price = self.price;

        let random_move = (self.rng.next_f64() - 0.5) * 2.0 * cfg.volatility * price;
        let trend = price * cfg.trend_strength;
        let momentum_effect = self.momentum * cfg.momentum_factor;
        self.momentum = random_move;

        let shock = if self.rng.next_f64() < cfg.shock_probability {
            (self.rng.next_f64() - 0.5) * 2.0 * price * cfg.shock_magnitude
        } else {
            0.0
        };

        let crash = if step > 0 && step % cfg.crash_interval == 0 {
            -price * cfg.crash_magnitude
        } else {
            0.0
        };

        self.price = (price + random_move + trend + momentum_effect + shock + crash)
            .clamp(cfg.min_price, cfg.max_price);
        self.price
    }
}

fn validate_config(cfg: &PriceGenConfig) -> Result<()> {
    let fail = |msg: &str| Err(OracleError::Config(msg.into()));

    if cfg.initial_price < cfg.min_price {
        return fail("initial price below minimum");
    }
    if cfg.initial_price > cfg.max_price {
        return fail("initial price above maximum");
    }
    if cfg.time_step == 0 {
        return fail("time step must be positive");
    }
    if cfg.volatility < 0.0 {
        return fail("volatility must be non-negative");
    }
    if !(0.0..=1.0).contains(&cfg.shock_probability) {
        return fail("shock probability must be between 0 and 1");
    }
    if cfg.crash_interval == 0 {
        return fail("crash interval must be positive");
    }
    if !(0.0..=1.0).contains(&cfg.crash_magnitude) {
        return fail("crash magnitude must be between 0 and 1");
    }
    Ok(())
}
