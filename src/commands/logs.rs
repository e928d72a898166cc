//! Stream a sandbox's container logs.

use anyhow::Result;

use super::manager;

pub async fn run(name: &str, follow: bool) -> Result<()> {
    let manager = manager()?;
    match manager.logs(name, follow).await? {}
}
