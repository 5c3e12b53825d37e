//! Seeded synthetic customer data.
//!
//! Generates a customer table with five latent behavioural segments, realistic
//! field correlations and a sprinkling of missing values, for demos, tests
//! and benchmarking the pipeline end to end. The same config always yields
//! the same table.
//!
//! | Segment | Share | Recency (days) | Frequency | Monetary |
//! |---------|-------|----------------|-----------|----------|
//! | VIP champions | 15% | 1-14 | 15-29 | 8,000-19,999 |
//! | Loyal | 25% | 15-44 | 8-19 | 3,000-9,999 |
//! | Potential loyalists | 30% | 20-59 | 5-11 | 1,500-4,999 |
//! | Price sensitive | 20% | 30-89 | 3-7 | 500-2,499 |
//! | At risk | 10% | 90-364 | 1-4 | 200-1,499 |

use crate::data::Schema;
use crate::error::{Error, Result};
use crate::preprocess::RawTable;
use rand::prelude::*;
use rand::seq::index;
use rand_distr::{Normal, Poisson};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Field names of the generated table, in column order.
pub const CUSTOMER_FIELDS: [&str; 12] = [
    "Age",
    "Income",
    "Recency",
    "Frequency",
    "Monetary",
    "AvgOrderValue",
    "WebsiteVisits",
    "EmailOpenRate",
    "TenureDays",
    "NumCategories",
    "DiscountUsage",
    "NumReturns",
];

const INCOME: usize = 1;
const EMAIL_OPEN_RATE: usize = 7;

/// Behavioural segment a synthetic customer was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LatentSegment {
    /// Recent, frequent, big spenders.
    VipChampion,
    /// Regular buyers.
    Loyal,
    /// Moderate activity with room to grow.
    PotentialLoyalist,
    /// Infrequent, low-spend buyers.
    PriceSensitive,
    /// Long since their last purchase.
    AtRisk,
}

impl LatentSegment {
    /// Every segment, in generation order.
    pub const ALL: [LatentSegment; 5] = [
        LatentSegment::VipChampion,
        LatentSegment::Loyal,
        LatentSegment::PotentialLoyalist,
        LatentSegment::PriceSensitive,
        LatentSegment::AtRisk,
    ];

    /// Share of the population.
    pub fn share(self) -> f64 {
        match self {
            LatentSegment::VipChampion => 0.15,
            LatentSegment::Loyal => 0.25,
            LatentSegment::PotentialLoyalist => 0.30,
            LatentSegment::PriceSensitive => 0.20,
            LatentSegment::AtRisk => 0.10,
        }
    }

    /// Half-open `(recency, frequency, monetary)` ranges.
    fn rfm_ranges(self) -> [(u32, u32); 3] {
        match self {
            LatentSegment::VipChampion => [(1, 15), (15, 30), (8000, 20000)],
            LatentSegment::Loyal => [(15, 45), (8, 20), (3000, 10000)],
            LatentSegment::PotentialLoyalist => [(20, 60), (5, 12), (1500, 5000)],
            LatentSegment::PriceSensitive => [(30, 90), (3, 8), (500, 2500)],
            LatentSegment::AtRisk => [(90, 365), (1, 5), (200, 1500)],
        }
    }

    fn sample(rng: &mut impl Rng) -> Self {
        let u: f64 = rng.random();
        let mut cumulative = 0.0;
        for segment in Self::ALL {
            cumulative += segment.share();
            if u < cumulative {
                return segment;
            }
        }
        LatentSegment::AtRisk
    }
}

/// Generator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Number of customers.
    pub n_customers: usize,
    /// Random seed.
    pub seed: u64,
    /// Fraction of rows with a missing `Income`.
    pub missing_income: f64,
    /// Fraction of rows with a missing `EmailOpenRate`.
    pub missing_email_open_rate: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_customers: 2000,
            seed: 42,
            missing_income: 0.03,
            missing_email_open_rate: 0.02,
        }
    }
}

/// A generated table plus the segment each row was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticDataset {
    /// Customer records with missing values.
    pub table: RawTable,
    /// Latent segment per row.
    pub segments: Vec<LatentSegment>,
}

impl SyntheticConfig {
    /// Config with `n_customers` and default everything else.
    pub fn new(n_customers: usize) -> Self {
        Self {
            n_customers,
            ..Self::default()
        }
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set both missing-value fractions.
    pub fn with_missing(mut self, income: f64, email_open_rate: f64) -> Self {
        self.missing_income = income;
        self.missing_email_open_rate = email_open_rate;
        self
    }

    /// Generate the dataset.
    pub fn generate(&self) -> Result<SyntheticDataset> {
        if self.n_customers == 0 {
            return Err(Error::invalid_parameter("n_customers", "must be at least 1"));
        }
        for (name, fraction) in [
            ("missing_income", self.missing_income),
            ("missing_email_open_rate", self.missing_email_open_rate),
        ] {
            if !(0.0..=1.0).contains(&fraction) {
                return Err(Error::invalid_parameter(name, "must be within [0, 1]"));
            }
        }

        let n = self.n_customers;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let age_dist = Normal::<f64>::new(45.0, 15.0)
            .map_err(|e| Error::invalid_parameter("age", e.to_string()))?;
        let income_dist = Normal::<f64>::new(60_000.0, 25_000.0)
            .map_err(|e| Error::invalid_parameter("income", e.to_string()))?;

        let mut rows = Vec::with_capacity(n);
        let mut segments = Vec::with_capacity(n);
        for _ in 0..n {
            let segment = LatentSegment::sample(&mut rng);
            let [recency, frequency, monetary] = segment
                .rfm_ranges()
                .map(|(lo, hi)| f64::from(rng.random_range(lo..hi)));

            let age = age_dist.sample(&mut rng).trunc().clamp(18.0, 80.0);
            let income = (income_dist.sample(&mut rng) + (age - 18.0) * 500.0)
                .clamp(20_000.0, 200_000.0)
                .trunc();
            let visits = poisson(&mut rng, 2.0 * frequency)?;
            let email_open_rate: f64 = rng.random_range(0.1..0.9);
            let tenure_days = f64::from(rng.random_range(30u32..1825));
            let num_categories = f64::from(rng.random_range(1u32..8));
            let discount_usage: f64 = rng.random_range(0.0..0.8);
            let num_returns = poisson(&mut rng, 0.1 * frequency)?;

            rows.push(vec![
                Some(age),
                Some(income),
                Some(recency),
                Some(frequency),
                Some(monetary),
                Some(monetary / frequency),
                Some(visits),
                Some(email_open_rate),
                Some(tenure_days),
                Some(num_categories),
                Some(discount_usage),
                Some(num_returns),
            ]);
            segments.push(segment);
        }

        for (column, fraction) in [
            (INCOME, self.missing_income),
            (EMAIL_OPEN_RATE, self.missing_email_open_rate),
        ] {
            let amount = (n as f64 * fraction) as usize;
            for i in index::sample(&mut rng, n, amount) {
                rows[i][column] = None;
            }
        }

        debug!(n_customers = n, seed = self.seed, "synthetic customers generated");
        Ok(SyntheticDataset {
            table: RawTable::new(customer_schema()?, rows)?,
            segments,
        })
    }
}

/// Schema of the generated customer table.
pub fn customer_schema() -> Result<Arc<Schema>> {
    Schema::new(CUSTOMER_FIELDS)
}

fn poisson(rng: &mut impl Rng, lambda: f64) -> Result<f64> {
    let dist = Poisson::new(lambda).map_err(|e| Error::invalid_parameter("lambda", e.to_string()))?;
    Ok(dist.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_shape_and_missing() {
        let data = SyntheticConfig::new(500).generate().unwrap();
        assert_eq!(data.table.len(), 500);
        assert_eq!(data.segments.len(), 500);
        assert_eq!(data.table.schema().fields().len(), CUSTOMER_FIELDS.len());

        let missing = data.table.missing_counts();
        assert_eq!(missing[INCOME], 15);
        assert_eq!(missing[EMAIL_OPEN_RATE], 10);
        assert_eq!(missing.iter().sum::<usize>(), 25);
    }

    #[test]
    fn test_deterministic() {
        let a = SyntheticConfig::new(100).with_seed(7).generate().unwrap();
        let b = SyntheticConfig::new(100).with_seed(7).generate().unwrap();
        let c = SyntheticConfig::new(100).with_seed(8).generate().unwrap();
        assert_eq!(a, b);
        assert_ne!(a.table, c.table);
    }

    #[test]
    fn test_ranges_follow_segment() {
        let data = SyntheticConfig::new(1000).with_missing(0.0, 0.0).generate().unwrap();
        for (row, segment) in data.table.rows().iter().zip(&data.segments) {
            let [(r_lo, r_hi), (f_lo, f_hi), (m_lo, m_hi)] = segment.rfm_ranges();
            let recency = row[2].unwrap();
            let frequency = row[3].unwrap();
            let monetary = row[4].unwrap();
            assert!(recency >= f64::from(r_lo) && recency < f64::from(r_hi));
            assert!(frequency >= f64::from(f_lo) && frequency < f64::from(f_hi));
            assert!(monetary >= f64::from(m_lo) && monetary < f64::from(m_hi));

            let age = row[0].unwrap();
            assert!((18.0..=80.0).contains(&age));
            let income = row[1].unwrap();
            assert!((20_000.0..=200_000.0).contains(&income));
            assert!((row[5].unwrap() - monetary / frequency).abs() < 1e-9);
        }
    }

    #[test]
    fn test_segment_mix_roughly_matches_shares() {
        let data = SyntheticConfig::new(5000).generate().unwrap();
        let mut counts: HashMap<LatentSegment, usize> = HashMap::new();
        for s in &data.segments {
            *counts.entry(*s).or_default() += 1;
        }
        for segment in LatentSegment::ALL {
            let share = counts[&segment] as f64 / 5000.0;
            assert!((share - segment.share()).abs() < 0.03, "{segment:?}: {share}");
        }
    }

    #[test]
    fn test_invalid_config() {
        assert!(SyntheticConfig::new(0).generate().is_err());
        assert!(SyntheticConfig::new(10).with_missing(1.5, 0.0).generate().is_err());
    }
}
