use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fs;
use std::path::Path;

/// Model architecture options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct ModelCfg {
    /// Backbone name. Only "resnet50" is recognized.
    pub name: String,
    /// Stride of the last residual stage (1 keeps spatial detail for re-ID).
    pub last_stride: i64,
    /// Path to pretrained backbone weights in safetensors format, "" to skip.
    pub pretrain_path: String,
    /// Use label-smoothed cross entropy for the ID loss.
    pub label_smooth: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct InputCfg {
    /// Train-time image size as [height, width].
    pub size_train: [i64; 2],
    /// Test-time image size as [height, width].
    pub size_test: [i64; 2],
    /// Probability of a random horizontal flip.
    pub flip_prob: f64,
    /// Pixels of zero padding before the random crop.
    pub padding: i64,
    /// Probability of random erasing.
    pub re_prob: f64,
    pub pixel_mean: [f64; 3],
    pub pixel_std: [f64; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct DatasetsCfg {
    /// Dataset name. Only "market1501" is recognized.
    pub names: String,
    /// Directory holding the dataset directories.
    pub root_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct DataloaderCfg {
    /// "softmax" for plain shuffling, "triplet" or "softmax_triplet" for P x K
    /// identity batches.
    pub sampler: String,
    /// Instances per identity in a P x K batch.
    pub num_instance: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct SolverCfg {
    pub optimizer_name: String,
    pub max_epochs: usize,
    pub base_lr: f64,
    pub weight_decay: f64,
    pub ims_per_batch: usize,
    /// Triplet loss margin.
    pub margin: f64,
    /// Multiplicative decay applied at each milestone crossing.
    pub gamma: f64,
    /// Epochs at which the learning rate decays.
    pub steps: Vec<usize>,
    /// Initial suppression factor at the very start of warmup.
    pub warmup_factor: f64,
    /// Warmup length, counted in epochs.
    pub warmup_iters: usize,
    pub checkpoint_period: usize,
    pub log_period: usize,
    pub eval_period: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct TestCfg {
    pub ims_per_batch: usize,
    /// L2-normalize features before computing distances.
    pub feat_norm: bool,
    /// Highest rank reported in the CMC curve.
    pub max_rank: usize,
}

/// Full configuration tree.
///
/// Built from defaults, then optionally merged with a YAML file and a list of
/// command-line `KEY VALUE` overrides. Once merging is done the struct is only
/// ever passed by shared reference, so downstream code sees a fixed config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub struct Config {
    pub model: ModelCfg,
    pub input: InputCfg,
    pub datasets: DatasetsCfg,
    pub dataloader: DataloaderCfg,
    pub solver: SolverCfg,
    pub test: TestCfg,
    pub output_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: ModelCfg {
                name: "resnet50".to_string(),
                last_stride: 1,
                pretrain_path: String::new(),
                label_smooth: false,
            },
            input: InputCfg {
                size_train: [256, 128],
                size_test: [256, 128],
                flip_prob: 0.5,
                padding: 10,
                re_prob: 0.5,
                pixel_mean: [0.485, 0.456, 0.406],
                pixel_std: [0.229, 0.224, 0.225],
            },
            datasets: DatasetsCfg {
                names: "market1501".to_string(),
                root_dir: "data".to_string(),
            },
            dataloader: DataloaderCfg {
                sampler: "softmax_triplet".to_string(),
                num_instance: 4,
            },
            solver: SolverCfg {
                optimizer_name: "Adam".to_string(),
                max_epochs: 120,
                base_lr: 3.5e-4,
                weight_decay: 5e-4,
                ims_per_batch: 64,
                margin: 0.3,
                gamma: 0.1,
                steps: vec![40, 70],
                warmup_factor: 1.0 / 3.0,
                warmup_iters: 10,
                checkpoint_period: 40,
                log_period: 100,
                eval_period: 40,
            },
            test: TestCfg {
                ims_per_batch: 128,
                feat_norm: true,
                max_rank: 50,
            },
            output_dir: "output".to_string(),
        }
    }
}

impl Config {
    /// Deep-merge a partial YAML file over the current values.
    pub fn merge_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let overlay: Value = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        let mut base = serde_yaml::to_value(&*self)?;
        merge_value(&mut base, overlay, "")?;
        *self = serde_yaml::from_value(base)?;
        Ok(())
    }

    /// Apply command-line overrides given as consecutive `KEY VALUE` pairs,
    /// where KEY is a dotted path like `SOLVER.BASE_LR`. Values are parsed as
    /// YAML, so numbers, booleans and flow sequences (`[40, 70]`) all work.
    pub fn merge_from_list(&mut self, opts: &[String]) -> Result<()> {
        if opts.is_empty() {
            return Ok(());
        }
        if opts.len() % 2 != 0 {
            bail!(
                "config overrides must come in KEY VALUE pairs, got {} items",
                opts.len()
            );
        }
        let mut root = serde_yaml::to_value(&*self)?;
        for pair in opts.chunks(2) {
            let (key, raw) = (&pair[0], &pair[1]);
            let mut slot = &mut root;
            for seg in key.split('.') {
                slot = match slot.get_mut(seg) {
                    Some(child) => child,
                    None => bail!("unknown config key: {}", key),
                };
            }
            *slot = serde_yaml::from_str(raw)
                .with_context(|| format!("invalid value {:?} for {}", raw, key))?;
        }
        *self = serde_yaml::from_value(root)
            .with_context(|| "config overrides produced an invalid config")?;
        Ok(())
    }
}

fn merge_value(base: &mut Value, overlay: Value, path: &str) -> Result<()> {
    match overlay {
        Value::Mapping(map) => {
            let base_map = match base {
                Value::Mapping(m) => m,
                _ => bail!("config key {} is not a section", path),
            };
            for (k, v) in map {
                let key = k.as_str().unwrap_or("?").to_string();
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                match base_map.get_mut(&k) {
                    Some(slot) => merge_value(slot, v, &child_path)?,
                    None => bail!("unknown config key: {}", child_path),
                }
            }
        }
        v => *base = v,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_override_hits_nested_key() {
        let mut cfg = Config::default();
        cfg.merge_from_list(&[
            "SOLVER.BASE_LR".to_string(),
            "0.01".to_string(),
            "SOLVER.STEPS".to_string(),
            "[30, 55]".to_string(),
            "MODEL.LABEL_SMOOTH".to_string(),
            "true".to_string(),
        ])
        .unwrap();
        assert_eq!(cfg.solver.base_lr, 0.01);
        assert_eq!(cfg.solver.steps, vec![30, 55]);
        assert!(cfg.model.label_smooth);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .merge_from_list(&["SOLVER.BOGUS".to_string(), "1".to_string()])
            .unwrap_err();
        assert!(err.to_string().contains("unknown config key"));
    }

    #[test]
    fn odd_override_list_is_rejected() {
        let mut cfg = Config::default();
        assert!(cfg.merge_from_list(&["SOLVER.BASE_LR".to_string()]).is_err());
    }

    #[test]
    fn file_merge_keeps_unmentioned_defaults() {
        let dir = std::env::temp_dir().join("reid_cfg_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.yaml");
        std::fs::write(&path, "SOLVER:\n  MAX_EPOCHS: 5\nOUTPUT_DIR: /tmp/out\n").unwrap();
        let mut cfg = Config::default();
        cfg.merge_from_file(&path).unwrap();
        assert_eq!(cfg.solver.max_epochs, 5);
        assert_eq!(cfg.output_dir, "/tmp/out");
        assert_eq!(cfg.solver.gamma, 0.1);
    }
}
