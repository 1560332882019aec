pub mod agg_sum;
pub mod moving_stat;

pub use agg_sum::{AggSum, AggSumConfig};
pub use moving_stat::{Inpainting, MovingStat, MovingStatConfig, Quantile, Statistic};
