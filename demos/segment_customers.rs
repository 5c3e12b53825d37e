use cohort::pipeline::{SegmentationConfig, Segmenter};
use cohort::synthetic::SyntheticConfig;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG=cohort=debug shows every candidate and stage.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Synthetic customers with a few gaps in Income and EmailOpenRate.
    let data = SyntheticConfig::new(2000).with_seed(42).generate()?;
    let missing: usize = data.table.missing_counts().iter().sum();
    println!("{} customers, {} missing values", data.table.len(), missing);

    // Defaults: median imputation, IQR capping, standard scaling,
    // k-means for k in 2..=8, ranked by silhouette.
    let segmentation = Segmenter::new(SegmentationConfig::default()).fit(&data.table)?;

    println!("\nCandidates:");
    for outcome in &segmentation.candidates {
        match (outcome.score(), outcome.inertia) {
            (Some(score), Some(inertia)) => {
                println!("  {:<24} silhouette={score:.3} inertia={inertia:.1}", outcome.algorithm)
            }
            _ => println!("  {:<24} excluded: {:?}", outcome.algorithm, outcome.status),
        }
    }

    let report = &segmentation.report;
    println!("\nChosen: {}", segmentation.model.algorithm());
    println!(
        "  silhouette={:?} ({:?}) calinski_harabasz={:?} davies_bouldin={:?}",
        report.silhouette, report.silhouette_quality, report.calinski_harabasz, report.davies_bouldin
    );

    println!("\nSegments:");
    for profile in segmentation.profiles.values() {
        println!(
            "  [{}] {:<22} {:>5} customers ({:>5.1}%)  {}",
            profile.label,
            profile.name,
            profile.size,
            profile.fraction * 100.0,
            profile.description
        );
        for field in ["Recency", "Frequency", "Monetary"] {
            if let Some(mean) = profile.mean(field) {
                println!("        {field:<10} mean {mean:>10.1}");
            }
        }
    }

    // A new customer with an unknown income.
    let mut record = data.table.rows()[0].clone();
    record[1] = None;
    let assignment = segmentation.assign_record(&record)?;
    println!(
        "\nNew customer -> segment {} ({})",
        assignment.label,
        assignment.name().unwrap_or("noise")
    );

    // The fitted segmentation is plain serde data.
    let json = segmentation.to_json()?;
    println!("Serialized segmentation: {} bytes", json.len());

    Ok(())
}
