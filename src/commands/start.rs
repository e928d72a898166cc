//! Start a sandbox without attaching to it.

use anyhow::Result;

use super::{format_started, manager, ConsoleProgress};

pub async fn run(name: &str, branch: Option<&str>) -> Result<()> {
    let manager = manager()?;
    let info = manager.start(name, branch, &ConsoleProgress).await?;
    print!("{}", format_started(&info));
    Ok(())
}
