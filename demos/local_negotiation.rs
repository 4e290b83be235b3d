//! A five-unit negotiation in a single process.
//!
//! Run with: cargo run --example local_negotiation

use std::sync::Arc;

use cohda::{Engine, EngineConfig, MemorySink, StaticModel, UnitModel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = EngineConfig {
        resolution: 900,
        period: 3600,
        topology_seed: Some(23),
        check_inbox_interval: std::time::Duration::from_millis(5),
        ..EngineConfig::default()
    };

    // Five households, each able to run flat, morning-heavy or
    // evening-heavy over four quarter hours.
    let units: Vec<(String, Arc<dyn UnitModel>)> = (0..5)
        .map(|i| {
            let model = StaticModel::new(vec![
                vec![0.5, 0.5, 0.5, 0.5],
                vec![1.0, 1.0, 0.0, 0.0],
                vec![0.0, 0.0, 1.0, 1.0],
            ]);
            (format!("household-{i}"), Arc::new(model) as Arc<dyn UnitModel>)
        })
        .collect();

    let engine = Engine::new(config, units, Some(Box::new(MemorySink::new())))?;
    let solution = engine
        .run_negotiation(
            "2017-07-05T00:00:00Z".parse()?,
            vec![3.0, 3.0, 2.0, 2.0],
            vec![1.0, 1.0, 1.0, 1.0],
        )
        .await?;

    println!("performance: {}", solution.perf());
    for agent in engine.agents() {
        println!(
            "{:<14} -> schedule {}",
            agent.name(),
            agent
                .current_schedule()
                .map(|sid| sid.to_string())
                .unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}
