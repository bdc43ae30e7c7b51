use tch::{nn, Tensor};

use crate::cfg::ModelCfg;
use crate::resnet::ResNet;

/// Baseline re-ID model: ResNet trunk, global average pooling, BNNeck and a
/// bias-free classifier.
///
/// Training uses the pre-BN pooled feature for the metric loss and the
/// post-BN feature for the ID classifier. Inference returns the post-BN
/// feature, which is what retrieval compares.
pub struct Baseline {
    backbone: ResNet,
    bottleneck: nn::BatchNorm,
    classifier: nn::Linear,
    pub num_classes: i64,
    pub in_planes: i64,
}

impl Baseline {
    pub fn new(vs: &nn::Path, cfg: &ModelCfg, num_classes: i64) -> Self {
        let backbone = ResNet::resnet50(&(vs / "base"), cfg.last_stride);
        let in_planes = backbone.out_planes();
        let bottleneck = nn::batch_norm1d(vs / "bottleneck", in_planes, Default::default());
        let classifier = nn::linear(
            vs / "classifier",
            in_planes,
            num_classes,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );

        Self {
            backbone,
            bottleneck,
            classifier,
            num_classes,
            in_planes,
        }
    }

    fn pooled_feat(&self, x: &Tensor, train: bool) -> Tensor {
        self.backbone
            .forward_t(x, train)
            .adaptive_avg_pool2d([1, 1])
            .flatten(1, -1)
    }

    /// x: [batch, 3, h, w]
    /// Returns (logits [batch, num_classes], global_feat [batch, in_planes]).
    pub fn forward_train(&self, x: &Tensor) -> (Tensor, Tensor) {
        let global_feat = self.pooled_feat(x, true);
        let feat = global_feat.apply_t(&self.bottleneck, true);
        let logits = feat.apply(&self.classifier);
        (logits, global_feat)
    }

    /// Inference feature: [batch, in_planes] after the BNNeck.
    pub fn forward(&self, x: &Tensor) -> Tensor {
        self.pooled_feat(x, false).apply_t(&self.bottleneck, false)
    }
}

unsafe impl Send for Baseline {}
unsafe impl Sync for Baseline {}

/// Builds the model named by the config.
///
/// Unrecognized names fall back to resnet50, matching the only trunk this
/// crate ships.
pub fn build_model(vs: &nn::Path, cfg: &ModelCfg, num_classes: i64) -> Baseline {
    if cfg.name != "resnet50" {
        log::warn!("unknown model name {:?}, building resnet50", cfg.name);
    }
    Baseline::new(vs, cfg, num_classes)
}
