//! satiscore: user satisfaction scoring CLI
//!
//! Entry point that loads both tables, runs the scoring pipeline, prints the
//! ranking and cluster statistics, and writes the score table.

use anyhow::{Context, Result};
use clap::Parser;
use satiscore::{pipeline, read_table, Args, ScoreReport};
use std::time::Instant;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        })
        .with_target(false)
        .init();

    if args.verbose {
        println!("satiscore - User Satisfaction Scoring");
        println!("=====================================\n");
    }

    // Validate the prediction input before doing any work
    let predict = args.parse_predict_values()?;

    let report = run_full_pipeline(&args)?;

    if let Some((engagement, experience)) = predict {
        run_prediction(&report, &engagement, &experience)?;
    }

    Ok(())
}

/// Load, score, report and export
fn run_full_pipeline(args: &Args) -> Result<ScoreReport> {
    println!("=== Satisfaction Scoring Pipeline ===\n");

    let start_time = Instant::now();
    let config = args.to_config();
    config.validate()?;

    // Step 1: Load data
    if args.verbose {
        println!("Step 1: Loading data");
        println!("  Engagement file: {}", args.engagement);
        println!("  Experience file: {}", args.experience);
    }

    let engagement_df = read_table(&args.engagement)
        .with_context(|| format!("failed to load engagement data from {}", args.engagement))?;
    let experience_df = read_table(&args.experience)
        .with_context(|| format!("failed to load experience data from {}", args.experience))?;

    println!(
        "✓ Data loaded: {} engagement rows, {} experience rows",
        engagement_df.height(),
        experience_df.height()
    );

    // Step 2: Join, cluster and score
    if args.verbose {
        println!("\nStep 2: Clustering and scoring");
        println!("  Number of clusters: {}", config.k);
        println!("  Restarts: {}", config.n_init);
        println!("  Max iterations: {}", config.max_iters);
        println!("  Seed: {}", config.seed);
        println!("  Reference policy: {:?}", config.reference);
    }

    let score_start = Instant::now();
    let report = pipeline::run(&engagement_df, &experience_df, &config)?;
    let score_time = score_start.elapsed();

    println!("✓ Scored {} users", report.len());
    if args.verbose {
        println!("  Scoring time: {:.2}s", score_time.as_secs_f64());
        println!(
            "  Reference clusters: engagement {}, experience {}",
            report.references.engagement, report.references.experience
        );
    }

    print_cluster_statistics(&report);
    print_ranking(&report);
    print_cluster_averages(&report);

    // Step 3: Export
    report
        .write_scores_csv(&args.output)
        .with_context(|| format!("failed to write scores to {}", args.output))?;

    let total_time = start_time.elapsed();
    println!("\n=== Pipeline Complete ===");
    println!("Total processing time: {:.2}s", total_time.as_secs_f64());
    println!("Scores saved to: {}", args.output);

    Ok(report)
}

fn print_cluster_statistics(report: &ScoreReport) {
    println!("\n=== Cluster Statistics ===");
    let total = report.len() as f64;

    let models = [
        ("Engagement", &report.engagement_model),
        ("Experience", &report.experience_model),
    ];
    for (name, model) in models {
        println!("{} clustering:", name);
        for (i, &size) in model.cluster_sizes().iter().enumerate() {
            let percentage = (size as f64 / total) * 100.0;
            println!("  Cluster {}: {} users ({:.1}%)", i, size, percentage);
        }
        println!("  Within-cluster sum of squares: {:.2}", model.inertia);
        println!("  Iterations: {}", model.n_iter);
        if !model.empty_clusters.is_empty() {
            println!("  Empty clusters (centroid reused): {:?}", model.empty_clusters);
        }
    }

    let silhouette = report.engagement_silhouette(100);
    println!("Engagement silhouette score (sample): {:.3}", silhouette);
}

fn print_ranking(report: &ScoreReport) {
    println!("\n=== Top {} Users by Satisfaction Score ===", report.top_n);
    for (rank, user) in report.top().iter().enumerate() {
        println!(
            "{:>3}. {:<20} {:.4}",
            rank + 1,
            user.user_id,
            user.satisfaction_score
        );
    }
}

fn print_cluster_averages(report: &ScoreReport) {
    println!("\n=== Averages per Engagement Cluster ===");
    for summary in report.cluster_summaries() {
        match (summary.mean_satisfaction, summary.mean_experience) {
            (Some(satisfaction), Some(experience)) => println!(
                "Cluster {}: satisfaction {:.4}, experience {:.4} ({} users)",
                summary.cluster, satisfaction, experience, summary.users
            ),
            _ => println!("Cluster {}: no users", summary.cluster),
        }
    }
}

/// Score a single user against the finished run
fn run_prediction(report: &ScoreReport, engagement: &[f64], experience: &[f64]) -> Result<()> {
    println!("\n=== Prediction ===");
    println!("Engagement values: {:?}", engagement);
    println!("Experience values: {:?}", experience);

    let estimate = report.score_user(engagement, experience)?;

    println!("\n✓ Satisfaction score: {:.4}", estimate.satisfaction_score);
    println!(
        "  Engagement score: {:.4} (cluster {})",
        estimate.engagement_score, estimate.engagement_cluster
    );
    println!(
        "  Experience score: {:.4} (cluster {})",
        estimate.experience_score, estimate.experience_cluster
    );

    Ok(())
}
