use cohort::cluster::{k_distances, AlgorithmKind};
use cohort::metrics::Metric;
use cohort::preprocess::{ImputeStrategy, Imputer, OutlierCapper};
use cohort::scaler::Scaler;
use cohort::select::{dbscan_grid, gmm_candidates, hierarchical_candidates, kmeans_candidates, ClusterSelector};
use cohort::synthetic::SyntheticConfig;
use cohort::Linkage;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let data = SyntheticConfig::new(800).with_seed(7).generate()?;
    let vectors = Imputer::fit(&data.table, ImputeStrategy::Median)?.transform(&data.table)?;
    let vectors = OutlierCapper::fit(&vectors)?.apply(&vectors)?;
    let matrix = Scaler::fit(&vectors)?.transform_batch(&vectors)?;

    // Sorted 5-distances: the knee is a reasonable DBSCAN epsilon.
    let kd = k_distances(&matrix, 5)?;
    let quantile = |q: f64| kd[((kd.len() - 1) as f64 * q) as usize];
    println!(
        "5-distance quantiles: p50={:.2} p90={:.2} p99={:.2}",
        quantile(0.5),
        quantile(0.9),
        quantile(0.99)
    );

    let families = [
        (AlgorithmKind::Partitional, kmeans_candidates(2..=8, 42)),
        (AlgorithmKind::Hierarchical, hierarchical_candidates(2..=8, Linkage::Ward)),
        (AlgorithmKind::ProbabilisticMixture, gmm_candidates(2..=6, 42)),
        (
            AlgorithmKind::DensityBased,
            dbscan_grid(&[quantile(0.5), quantile(0.9), quantile(0.99)], &[5, 10]),
        ),
    ];

    let selector = ClusterSelector::new(Metric::Silhouette).with_max_noise_fraction(0.3);
    println!("\n{:<22} {:<32} {:>8} {:>10} {:>8} {:>6}", "family", "best", "sil", "ch", "db", "noise");
    for (kind, candidates) in families {
        match selector.select_best(&matrix, kind, &candidates) {
            Ok(selection) => {
                let r = &selection.report;
                println!(
                    "{:<22} {:<32} {:>8.3} {:>10.1} {:>8.3} {:>6}",
                    kind.to_string(),
                    selection.model.algorithm().to_string(),
                    r.silhouette.unwrap_or(f64::NAN),
                    r.calinski_harabasz.unwrap_or(f64::NAN),
                    r.davies_bouldin.unwrap_or(f64::NAN),
                    r.n_noise
                );
            }
            Err(e) => println!("{:<22} {e}", kind.to_string()),
        }
    }

    Ok(())
}
