use tch::{nn, Tensor};

const EXPANSION: i64 = 4;

fn conv2d(vs: &nn::Path, c_in: i64, c_out: i64, ksize: i64, stride: i64, padding: i64) -> nn::Conv2D {
    nn::conv2d(
        vs,
        c_in,
        c_out,
        ksize,
        nn::ConvConfig {
            stride,
            padding,
            bias: false,
            ..Default::default()
        },
    )
}

/// Bottleneck residual block (1x1 -> 3x3 -> 1x1, expansion 4).
pub struct Bottleneck {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
    conv3: nn::Conv2D,
    bn3: nn::BatchNorm,
    downsample: Option<(nn::Conv2D, nn::BatchNorm)>,
}

impl Bottleneck {
    pub fn new(vs: &nn::Path, in_planes: i64, planes: i64, stride: i64) -> Self {
        let out_planes = planes * EXPANSION;
        let conv1 = conv2d(&(vs / "conv1"), in_planes, planes, 1, 1, 0);
        let bn1 = nn::batch_norm2d(vs / "bn1", planes, Default::default());
        let conv2 = conv2d(&(vs / "conv2"), planes, planes, 3, stride, 1);
        let bn2 = nn::batch_norm2d(vs / "bn2", planes, Default::default());
        let conv3 = conv2d(&(vs / "conv3"), planes, out_planes, 1, 1, 0);
        let bn3 = nn::batch_norm2d(vs / "bn3", out_planes, Default::default());

        // Project the shortcut when the shape changes.
        let downsample = if stride != 1 || in_planes != out_planes {
            let conv = conv2d(&(vs / "downsample" / "0"), in_planes, out_planes, 1, stride, 0);
            let bn = nn::batch_norm2d(vs / "downsample" / "1", out_planes, Default::default());
            Some((conv, bn))
        } else {
            None
        };

        Self {
            conv1,
            bn1,
            conv2,
            bn2,
            conv3,
            bn3,
            downsample,
        }
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        let out = x
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train)
            .relu()
            .apply(&self.conv3)
            .apply_t(&self.bn3, train);

        let shortcut = match &self.downsample {
            Some((conv, bn)) => x.apply(conv).apply_t(bn, train),
            None => x.shallow_clone(),
        };

        (out + shortcut).relu()
    }
}

unsafe impl Send for Bottleneck {}
unsafe impl Sync for Bottleneck {}

/// ResNet-50 trunk without the classification head.
///
/// `last_stride` controls the stride of the final stage; re-ID models use 1 to
/// keep a larger feature map before pooling.
pub struct ResNet {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    layers: Vec<Vec<Bottleneck>>,
}

impl ResNet {
    pub fn resnet50(vs: &nn::Path, last_stride: i64) -> Self {
        Self::new(vs, &[3, 4, 6, 3], last_stride)
    }

    fn new(vs: &nn::Path, blocks: &[i64; 4], last_stride: i64) -> Self {
        let conv1 = conv2d(&(vs / "conv1"), 3, 64, 7, 2, 3);
        let bn1 = nn::batch_norm2d(vs / "bn1", 64, Default::default());

        let mut layers = Vec::new();
        let mut in_planes = 64;
        let planes = [64, 128, 256, 512];
        for (stage, (&n, &p)) in blocks.iter().zip(planes.iter()).enumerate() {
            let stride = match stage {
                0 => 1,
                3 => last_stride,
                _ => 2,
            };
            let stage_vs = vs / format!("layer{}", stage + 1);
            let mut stage_blocks = Vec::new();
            for i in 0..n {
                let s = if i == 0 { stride } else { 1 };
                stage_blocks.push(Bottleneck::new(&(&stage_vs / i), in_planes, p, s));
                in_planes = p * EXPANSION;
            }
            layers.push(stage_blocks);
        }

        Self { conv1, bn1, layers }
    }

    /// Number of channels in the output feature map.
    pub fn out_planes(&self) -> i64 {
        512 * EXPANSION
    }

    /// x: [batch, 3, h, w] -> [batch, 2048, h/16, w/16] (with last_stride 1)
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Tensor {
        let mut x = x
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false);
        for stage in &self.layers {
            for block in stage {
                x = block.forward_t(&x, train);
            }
        }
        x
    }
}

unsafe impl Send for ResNet {}
unsafe impl Sync for ResNet {}
