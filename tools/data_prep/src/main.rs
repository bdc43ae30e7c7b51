use clap::Parser;
use serde_json::json;
use std::collections::BTreeSet;
use std::path::PathBuf;

use reid_data::{ImageItem, Market1501};

/// Inspect a Market-1501-style dataset directory and report split statistics.
#[derive(Parser)]
struct Cli {
    /// Dataset directory holding bounding_box_train/query/bounding_box_test
    #[arg(short, long)]
    root: PathBuf,

    /// Write a JSON manifest of all images next to the statistics
    #[arg(long)]
    manifest: Option<PathBuf>,
}

fn describe(items: &[ImageItem]) -> (usize, usize, usize) {
    let pids: BTreeSet<i64> = items.iter().map(|it| it.pid).collect();
    let cams: BTreeSet<i64> = items.iter().map(|it| it.camid).collect();
    (pids.len(), items.len(), cams.len())
}

fn manifest_entries(split: &str, items: &[ImageItem]) -> Vec<serde_json::Value> {
    items
        .iter()
        .map(|it| {
            json!({
                "split": split,
                "path": it.path,
                "pid": it.pid,
                "camid": it.camid,
            })
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let ds = Market1501::load(&cli.root)?;

    println!("dataset at {:?}", cli.root);
    println!("  subset   | # ids | # images | # cameras");
    for (name, items) in [
        ("train", &ds.train),
        ("query", &ds.query),
        ("gallery", &ds.gallery),
    ] {
        let (pids, imgs, cams) = describe(items);
        println!("  {:<8} | {:>5} | {:>8} | {:>9}", name, pids, imgs, cams);
    }

    if let Some(path) = cli.manifest {
        let mut entries = manifest_entries("train", &ds.train);
        entries.extend(manifest_entries("query", &ds.query));
        entries.extend(manifest_entries("gallery", &ds.gallery));
        std::fs::write(&path, serde_json::to_string_pretty(&entries)?)?;
        println!("Wrote manifest with {} entries to {:?}", entries.len(), path);
    }

    Ok(())
}
