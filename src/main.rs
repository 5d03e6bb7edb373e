use std::sync::Arc;

use courier::driver::DetachedDriver;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // No automation bridge is wired into the binary itself; the service runs
    // in detached mode, queuing messages and serving status, until a
    // deployment supplies a real driver through `courier::run()`.
    courier::run().driver(Arc::new(DetachedDriver)).start().await
}
