mod adapters;
mod cycle;
mod host;
mod resilient;
mod store;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
