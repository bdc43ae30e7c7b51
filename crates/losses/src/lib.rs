pub mod triplet;

pub use triplet::TripletLoss;

use tch::{Kind, Tensor};

use reid_core::cfg::Config;

/// Cross entropy against a smoothed target distribution: the true class gets
/// `1 - epsilon`, the rest share `epsilon`.
pub struct CrossEntropyLabelSmooth {
    num_classes: i64,
    epsilon: f64,
}

impl CrossEntropyLabelSmooth {
    pub fn new(num_classes: i64) -> Self {
        Self {
            num_classes,
            epsilon: 0.1,
        }
    }

    /// logits: [batch, num_classes], targets: [batch] int64
    pub fn forward(&self, logits: &Tensor, targets: &Tensor) -> Tensor {
        let log_probs = logits.log_softmax(-1, Kind::Float);
        let one_hot = Tensor::zeros_like(&log_probs).scatter_value(1, &targets.unsqueeze(1), 1.0);
        let smoothed = one_hot * (1.0 - self.epsilon) + self.epsilon / self.num_classes as f64;
        (-smoothed * log_probs)
            .sum_dim_intlist(Some(&[-1][..]), false, Kind::Float)
            .mean(Kind::Float)
    }
}

enum IdLoss {
    Plain,
    Smooth(CrossEntropyLabelSmooth),
}

/// Combined training loss: ID classification term plus an optional batch-hard
/// triplet term on the pooled features.
pub struct ReidLoss {
    id: IdLoss,
    triplet: Option<TripletLoss>,
}

impl ReidLoss {
    pub fn forward(&self, logits: &Tensor, feats: &Tensor, targets: &Tensor) -> Tensor {
        let id_loss = match &self.id {
            IdLoss::Plain => logits.cross_entropy_for_logits(targets),
            IdLoss::Smooth(smooth) => smooth.forward(logits, targets),
        };
        match &self.triplet {
            Some(triplet) => id_loss + triplet.forward(feats, targets),
            None => id_loss,
        }
    }
}

/// Builds the loss the sampler configuration asks for: "softmax" trains with
/// the ID term only, "softmax_triplet" adds the metric term.
pub fn make_loss(cfg: &Config, num_classes: i64) -> ReidLoss {
    let id = if cfg.model.label_smooth {
        IdLoss::Smooth(CrossEntropyLabelSmooth::new(num_classes))
    } else {
        IdLoss::Plain
    };
    let triplet = match cfg.dataloader.sampler.as_str() {
        "triplet" | "softmax_triplet" => Some(TripletLoss::new(cfg.solver.margin)),
        _ => None,
    };
    ReidLoss { id, triplet }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_smooth_matches_closed_form() {
        // two classes, logits strongly prefer class 0
        let logits = Tensor::from_slice2(&[[10.0f32, 0.0]]);
        let targets = Tensor::from_slice(&[0i64]);
        let loss = CrossEntropyLabelSmooth::new(2).forward(&logits, &targets);

        let flat = logits.log_softmax(-1, Kind::Float).view([-1]);
        let log_probs: Vec<f32> = Vec::try_from(&flat).unwrap();
        // smoothed targets: [0.95, 0.05]
        let expected = -(0.95 * log_probs[0] as f64 + 0.05 * log_probs[1] as f64);
        assert!((loss.double_value(&[]) - expected).abs() < 1e-5);
    }

    #[test]
    fn softmax_sampler_gets_no_triplet_term() {
        let mut cfg = Config::default();
        cfg.dataloader.sampler = "softmax".to_string();
        let loss = make_loss(&cfg, 10);
        assert!(loss.triplet.is_none());

        cfg.dataloader.sampler = "softmax_triplet".to_string();
        let loss = make_loss(&cfg, 10);
        assert!(loss.triplet.is_some());
    }
}
