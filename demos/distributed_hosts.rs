//! A negotiation spread over three TCP hosts in one binary: a controller
//! process and two unit-agent processes, wired exactly as separate
//! deployments would be.
//!
//! Run with: cargo run --example distributed_hosts

use std::sync::Arc;
use std::time::Duration;

use cohda::{Host, MessageCounter, NetConnector, RemoteObserver, StaticModel, UnitModel};
use cohda_engine::{Connector, Controller, EngineConfig, Observer, ObserverApi, UnitAgent};
use ndarray::array;
use tokio::net::TcpListener;

async fn agent_process(
    ctrl_socket: String,
    name: &str,
    curves: Vec<Vec<f64>>,
) -> anyhow::Result<Arc<Host>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket = listener.local_addr()?.to_string();

    let observer = Arc::new(RemoteObserver::connect(&ctrl_socket).await?);
    let connector = Arc::new(NetConnector::new());
    let agent = UnitAgent::new(
        name,
        format!("{socket}/{name}"),
        Arc::new(StaticModel::new(curves)) as Arc<dyn UnitModel>,
        observer as Arc<dyn ObserverApi>,
        connector as Arc<dyn Connector>,
        Duration::from_millis(5),
    );

    let host = Host::for_agents([agent]);
    tokio::spawn(Arc::clone(&host).serve(listener));
    host.register_agents(&ctrl_socket).await?;
    Ok(host)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = EngineConfig {
        n_agents: Some(2),
        resolution: 900,
        period: 1800,
        topology_seed: Some(23),
        ..EngineConfig::default()
    };

    // Controller process: controller + observer behind one host.
    let observer = Arc::new(Observer::new(Some(2), Box::new(MessageCounter::new()), None));
    let controller = Arc::new(Controller::new(&config));
    observer.set_controller(controller.clone());
    controller.register_observer(observer.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let ctrl_socket = listener.local_addr()?.to_string();
    let ctrl_host = Host::for_controller(controller.clone(), observer.clone());
    tokio::spawn(Arc::clone(&ctrl_host).serve(listener));

    // Two unit-agent processes.
    let _a = agent_process(
        ctrl_socket.clone(),
        "battery",
        vec![vec![0.0, 0.0], vec![2.0, 0.0]],
    )
    .await?;
    let _b = agent_process(
        ctrl_socket.clone(),
        "chp",
        vec![vec![0.0, 0.0], vec![0.0, 2.0]],
    )
    .await?;

    controller.agents_registered().wait().await;

    let solution = controller
        .clone()
        .run_negotiation(
            "2017-07-05T00:00:00Z".parse()?,
            array![2.0, 2.0],
            array![1.0, 1.0],
        )
        .await?;

    println!("performance: {}", solution.perf());
    println!("assignments: {:?}", solution.sids());
    Ok(())
}
