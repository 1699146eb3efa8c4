use std::sync::Arc;

use anyhow::Result;
use futures::TryStreamExt;
use streamgrid::dataset::{dataset_of_list, filter, local_sort};
use streamgrid::{
    Collector, DataflowClient, DataflowConfig, DataflowGraph, DataflowServer, Environment, Partition, Registry,
};
use tracing_subscriber::EnvFilter;

fn registry() -> Registry {
    let mut registry = Registry::with_builtins();
    registry.register_predicate::<i64, _>("is_even_i64", |v| v % 2 == 0);
    registry
}

async fn start_worker(items: Vec<i64>) -> Result<DataflowServer> {
    let environment = Environment::new()
        .with_instance(registry())
        .with_instance(DataflowConfig::default())
        .with_iterable("numbers", items);
    let mut server = DataflowServer::new(environment);
    server.listen("127.0.0.1:0").await?;
    Ok(server)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut workers = vec![
        start_worker(vec![6, 4, 2, 3, 1]).await?,
        start_worker(vec![7, 7, 8, 2, 5]).await?,
    ];
    let partitions = workers
        .iter()
        .filter_map(|server| server.local_addr())
        .map(Partition::new)
        .collect();

    let client = Arc::new(DataflowClient::new(Arc::new(registry()), DataflowConfig::default()));
    let mut graph = DataflowGraph::new(partitions);
    let evens = local_sort(filter(dataset_of_list("numbers", "i64"), "is_even_i64"), "identity_i64", "natural_i64");
    let results = Collector::new(evens, client.clone()).compile_typed::<i64>(&mut graph)?;

    println!("{}", graph.to_graphviz());
    graph.execute(&client).await?;

    let values: Vec<i64> = results.try_collect().await?;
    println!("sorted evens per partition: {:?}", values);

    for worker in &mut workers {
        worker.close().await;
    }
    Ok(())
}
