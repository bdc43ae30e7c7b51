use anyhow::Result;
use log::info;
use std::path::PathBuf;
use tch::{nn, nn::OptimizerConfig, Device, Kind};

use losses::ReidLoss;
use reid_core::checkpoint::load_pretrained;
use reid_core::{build_model, Baseline, Config};
use reid_data::DataBunch;
use retrieval::R1mAP;

use crate::schedule::WarmupMultiStep;

pub struct Trainer {
    cfg: Config,
    model: Baseline,
    optimizer: nn::Optimizer,
    schedule: WarmupMultiStep,
    vs: nn::VarStore,
}

impl Trainer {
    pub fn new(cfg: &Config, num_classes: i64, device: Device) -> Result<Self> {
        let mut vs = nn::VarStore::new(device);
        let model = build_model(&vs.root(), &cfg.model, num_classes);

        if !cfg.model.pretrain_path.is_empty() {
            info!("loading pretrained weights from {}", cfg.model.pretrain_path);
            load_pretrained(&mut vs, &cfg.model.pretrain_path)?;
        }

        let optimizer = nn::Adam {
            wd: cfg.solver.weight_decay,
            ..Default::default()
        }
        .build(&vs, cfg.solver.base_lr)?;

        Ok(Self {
            cfg: cfg.clone(),
            model,
            optimizer,
            schedule: WarmupMultiStep::from_solver(&cfg.solver),
            vs,
        })
    }

    /// Runs the full training schedule, with periodic retrieval evaluation
    /// and checkpointing.
    pub fn train(
        &mut self,
        bunch: &DataBunch,
        test_labels: &[(i64, i64)],
        loss_fn: &ReidLoss,
        num_query: usize,
    ) -> Result<()> {
        let solver = self.cfg.solver.clone();
        let batches_per_epoch = bunch.batches_per_epoch();
        let total_iters = (solver.max_epochs * batches_per_epoch).max(1);
        info!(
            "start training: {} epochs, {} iterations per epoch",
            solver.max_epochs, batches_per_epoch
        );

        let mut iter = 0usize;
        for epoch in 0..solver.max_epochs {
            let mut running_loss = 0f64;
            let mut running_acc = 0f64;
            let mut seen = 0usize;

            for batch in bunch.train_epoch() {
                let (images, targets) = batch?;

                let pct = iter as f64 / total_iters as f64;
                let lr = self.schedule.lr_at(solver.base_lr, 0.0, pct);
                self.optimizer.set_lr(lr);

                let (logits, feats) = self.model.forward_train(&images);
                let loss = loss_fn.forward(&logits, &feats, &targets);
                self.optimizer.backward_step(&loss);

                let acc = logits
                    .argmax(-1, false)
                    .eq_tensor(&targets)
                    .to_kind(Kind::Float)
                    .mean(Kind::Float)
                    .double_value(&[]);
                running_loss += loss.double_value(&[]);
                running_acc += acc;
                seen += 1;
                iter += 1;

                if seen % solver.log_period == 0 {
                    info!(
                        "Epoch[{}] Iteration[{}/{}] Loss: {:.3}, Acc: {:.3}, Base Lr: {:.2e}",
                        epoch + 1,
                        seen,
                        batches_per_epoch,
                        running_loss / seen as f64,
                        running_acc / seen as f64,
                        lr
                    );
                }
            }

            if seen > 0 {
                info!(
                    "Epoch {} done. Avg loss: {:.3}, avg acc: {:.3}",
                    epoch + 1,
                    running_loss / seen as f64,
                    running_acc / seen as f64
                );
            }

            if (epoch + 1) % solver.eval_period == 0 {
                self.evaluate(bunch, test_labels, num_query)?;
            }
            if (epoch + 1) % solver.checkpoint_period == 0 {
                self.save_checkpoint(epoch + 1)?;
            }
        }

        Ok(())
    }

    fn evaluate(
        &self,
        bunch: &DataBunch,
        test_labels: &[(i64, i64)],
        num_query: usize,
    ) -> Result<()> {
        let mut metric = R1mAP::new(num_query, self.cfg.test.max_rank, self.cfg.test.feat_norm);

        let mut offset = 0usize;
        for batch in bunch.test_batches() {
            let images = batch?;
            let rows = images.size()[0] as usize;
            let feat = tch::no_grad(|| self.model.forward(&images));
            metric.update(&feat, &test_labels[offset..offset + rows]);
            offset += rows;
        }

        let (cmc, map) = metric.compute()?;
        info!("Validation Results");
        info!("mAP: {:.1}%", map * 100.0);
        for r in [1, 5, 10] {
            if r <= cmc.len() {
                info!("CMC curve, Rank-{:<2}: {:.1}%", r, cmc[r - 1] * 100.0);
            }
        }
        Ok(())
    }

    fn save_checkpoint(&self, epoch: usize) -> Result<()> {
        let dir = PathBuf::from(&self.cfg.output_dir);
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }

        let weights = dir.join(format!("{}_model_{}.ot", self.cfg.model.name, epoch));
        self.vs.save(&weights)?;

        let config_path = dir.join("config.json");
        std::fs::write(&config_path, serde_json::to_string_pretty(&self.cfg)?)?;

        info!("saved checkpoint to {:?}", weights);
        Ok(())
    }
}
