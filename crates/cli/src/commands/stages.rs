//! `stages` command implementation.

use anyhow::{Context, Result};
use contracts::StageId;
use serde::Serialize;

use crate::cli::StagesArgs;

#[derive(Serialize)]
struct StageInfo {
    index: usize,
    key: &'static str,
    label: &'static str,
}

fn stage_infos() -> Vec<StageInfo> {
    StageId::ALL
        .into_iter()
        .map(|stage| StageInfo {
            index: stage.index(),
            key: stage.key(),
            label: stage.label(),
        })
        .collect()
}

/// Execute the `stages` command
pub fn run_stages(args: &StagesArgs) -> Result<()> {
    let stages = stage_infos();

    if args.json {
        let json = serde_json::to_string_pretty(&stages).context("Failed to serialize stages")?;
        println!("{}", json);
    } else {
        for stage in &stages {
            println!("{}. {:<18} {}", stage.index + 1, stage.key, stage.label);
        }
    }

    Ok(())
}
