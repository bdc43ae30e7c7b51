use log::info;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::DataError;

/// One dataset image with its identity and camera labels.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub path: PathBuf,
    pub pid: i64,
    pub camid: i64,
}

/// Market-1501 directory layout:
///
/// ```text
/// <root>/
///   bounding_box_train/   0002_c1s1_000451_03.jpg ...
///   query/
///   bounding_box_test/
/// ```
///
/// File names encode `<pid>_c<camid>...`. Junk images carry pid -1 and are
/// skipped; pid 0 distractors stay in the gallery. Training pids are relabeled
/// to a dense `[0, num_train_pids)` range so they can serve as class targets.
pub struct Market1501 {
    pub train: Vec<ImageItem>,
    pub query: Vec<ImageItem>,
    pub gallery: Vec<ImageItem>,
    pub num_train_pids: i64,
}

impl Market1501 {
    pub fn load(root: &Path) -> Result<Self, DataError> {
        if !root.is_dir() {
            return Err(DataError::MissingDir(root.to_path_buf()));
        }

        let mut train = scan_split(&root.join("bounding_box_train"))?;
        let query = scan_split(&root.join("query"))?;
        let gallery = scan_split(&root.join("bounding_box_test"))?;

        let num_train_pids = relabel(&mut train);

        let ds = Self {
            train,
            query,
            gallery,
            num_train_pids,
        };
        ds.log_statistics();
        Ok(ds)
    }

    fn log_statistics(&self) {
        info!("Market1501 loaded");
        info!("  subset   | # ids | # images | # cameras");
        for (name, items, pids) in [
            ("train", &self.train, self.num_train_pids),
            ("query", &self.query, count_pids(&self.query)),
            ("gallery", &self.gallery, count_pids(&self.gallery)),
        ] {
            let cams: std::collections::BTreeSet<i64> =
                items.iter().map(|it| it.camid).collect();
            info!(
                "  {:<8} | {:>5} | {:>8} | {:>9}",
                name,
                pids,
                items.len(),
                cams.len()
            );
        }
    }
}

fn count_pids(items: &[ImageItem]) -> i64 {
    let pids: std::collections::BTreeSet<i64> = items.iter().map(|it| it.pid).collect();
    pids.len() as i64
}

/// Rewrites pids in place to a dense range; returns the number of identities.
fn relabel(items: &mut [ImageItem]) -> i64 {
    let mut mapping = BTreeMap::new();
    for item in items.iter() {
        let next = mapping.len() as i64;
        mapping.entry(item.pid).or_insert(next);
    }
    for item in items.iter_mut() {
        item.pid = mapping[&item.pid];
    }
    mapping.len() as i64
}

fn scan_split(dir: &Path) -> Result<Vec<ImageItem>, DataError> {
    if !dir.is_dir() {
        return Err(DataError::MissingDir(dir.to_path_buf()));
    }

    // Names look like 0002_c1s1_000451_03.jpg; -1 marks junk detections.
    let pattern = Regex::new(r"^(-?\d+)_c(\d+)").expect("valid literal regex");

    let mut items = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("jpg") | Some("jpeg") | Some("png")
            )
        })
        .collect();
    entries.sort();

    for path in entries {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DataError::BadFileName(path.display().to_string()))?;
        let caps = pattern
            .captures(name)
            .ok_or_else(|| DataError::BadFileName(name.to_string()))?;
        let pid: i64 = caps[1]
            .parse()
            .map_err(|_| DataError::BadFileName(name.to_string()))?;
        let camid: i64 = caps[2]
            .parse()
            .map_err(|_| DataError::BadFileName(name.to_string()))?;
        if pid == -1 {
            continue;
        }
        items.push(ImageItem {
            path,
            pid,
            // Camera ids in file names start at 1.
            camid: camid - 1,
        });
    }

    if items.is_empty() {
        return Err(DataError::EmptySplit(dir.display().to_string()));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    fn make_split(root: &Path, split: &str, names: &[&str]) {
        let dir = root.join(split);
        std::fs::create_dir_all(&dir).unwrap();
        for name in names {
            touch(&dir, name);
        }
    }

    #[test]
    fn parses_and_relabels() {
        let root = std::env::temp_dir().join("market_test_parse");
        let _ = std::fs::remove_dir_all(&root);
        make_split(
            &root,
            "bounding_box_train",
            &[
                "0007_c1s1_000051_00.jpg",
                "0007_c2s1_000076_00.jpg",
                "0100_c3s1_000151_00.jpg",
                "-1_c1s1_000401_00.jpg",
            ],
        );
        make_split(&root, "query", &["0007_c3s1_000026_00.jpg"]);
        make_split(&root, "bounding_box_test", &["0007_c4s2_000026_00.jpg"]);

        let ds = Market1501::load(&root).unwrap();
        // junk image skipped, two ids relabeled to 0 and 1
        assert_eq!(ds.train.len(), 3);
        assert_eq!(ds.num_train_pids, 2);
        assert_eq!(ds.train[0].pid, 0);
        assert_eq!(ds.train[2].pid, 1);
        // camera ids shift to start at 0
        assert_eq!(ds.train[0].camid, 0);
        assert_eq!(ds.gallery[0].camid, 3);
        // query/gallery pids stay raw
        assert_eq!(ds.query[0].pid, 7);
    }

    #[test]
    fn missing_dir_is_an_error() {
        let root = std::env::temp_dir().join("market_test_missing");
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        assert!(matches!(
            Market1501::load(&root),
            Err(DataError::MissingDir(_))
        ));
    }

    #[test]
    fn bad_file_name_is_an_error() {
        let root = std::env::temp_dir().join("market_test_badname");
        let _ = std::fs::remove_dir_all(&root);
        make_split(&root, "bounding_box_train", &["not_a_reid_name.jpg"]);
        make_split(&root, "query", &["0007_c3s1_000026_00.jpg"]);
        make_split(&root, "bounding_box_test", &["0007_c4s2_000026_00.jpg"]);
        assert!(matches!(
            Market1501::load(&root),
            Err(DataError::BadFileName(_))
        ));
    }
}
