use anyhow::Result;
use rand::Rng;
use std::path::Path;
use tch::{vision::image, Kind, Tensor};

use reid_core::cfg::InputCfg;

// Random-erasing region bounds, from the usual re-ID recipe.
const RE_AREA_LO: f64 = 0.02;
const RE_AREA_HI: f64 = 0.4;
const RE_ASPECT_LO: f64 = 0.3;

fn load_resized(path: &Path, size: [i64; 2]) -> Result<Tensor> {
    let [h, w] = size;
    // load_and_resize takes (width, height) and returns CHW u8.
    let t = image::load_and_resize(path, w, h)?;
    Ok(t.to_kind(Kind::Float) / 255.0)
}

fn normalize(t: &Tensor, cfg: &InputCfg) -> Tensor {
    let mean = Tensor::from_slice(&cfg.pixel_mean).view([3, 1, 1]);
    let std = Tensor::from_slice(&cfg.pixel_std).view([3, 1, 1]);
    (t - mean.to_kind(Kind::Float)) / std.to_kind(Kind::Float)
}

fn pad_and_random_crop(t: &Tensor, padding: i64, rng: &mut impl Rng) -> Tensor {
    if padding <= 0 {
        return t.shallow_clone();
    }
    let size = t.size();
    let (h, w) = (size[1], size[2]);
    let padded = t.pad([padding, padding, padding, padding], "constant", 0.0);
    let top = rng.gen_range(0..=2 * padding);
    let left = rng.gen_range(0..=2 * padding);
    padded.narrow(1, top, h).narrow(2, left, w)
}

fn random_erase(t: &Tensor, cfg: &InputCfg, rng: &mut impl Rng) -> Tensor {
    let out = t.copy();
    let size = out.size();
    let (h, w) = (size[1], size[2]);
    let area = (h * w) as f64;

    for _ in 0..100 {
        let target_area = rng.gen_range(RE_AREA_LO..RE_AREA_HI) * area;
        let aspect = rng.gen_range(RE_ASPECT_LO..1.0 / RE_ASPECT_LO);
        let eh = (target_area * aspect).sqrt().round() as i64;
        let ew = (target_area / aspect).sqrt().round() as i64;
        if eh < h && ew < w && eh > 0 && ew > 0 {
            let top = rng.gen_range(0..h - eh);
            let left = rng.gen_range(0..w - ew);
            for (c, &m) in cfg.pixel_mean.iter().enumerate() {
                let mut region = out
                    .narrow(0, c as i64, 1)
                    .narrow(1, top, eh)
                    .narrow(2, left, ew);
                let _ = region.fill_(m);
            }
            break;
        }
    }
    out
}

/// Train-time pipeline: resize, random flip, pad + random crop, normalize,
/// random erasing.
pub fn load_train_image(path: &Path, cfg: &InputCfg, rng: &mut impl Rng) -> Result<Tensor> {
    let mut t = load_resized(path, cfg.size_train)?;
    if rng.gen::<f64>() < cfg.flip_prob {
        t = t.flip([2]);
    }
    t = pad_and_random_crop(&t, cfg.padding, rng);
    t = normalize(&t, cfg);
    if rng.gen::<f64>() < cfg.re_prob {
        t = random_erase(&t, cfg, rng);
    }
    Ok(t)
}

/// Test-time pipeline: resize and normalize only.
pub fn load_test_image(path: &Path, cfg: &InputCfg) -> Result<Tensor> {
    let t = load_resized(path, cfg.size_test)?;
    Ok(normalize(&t, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn input_cfg() -> InputCfg {
        reid_core::Config::default().input
    }

    #[test]
    fn normalize_centers_the_mean_pixel() {
        let cfg = input_cfg();
        let t = Tensor::from_slice(&[0.485f32, 0.456, 0.406])
            .view([3, 1, 1])
            .expand([3, 4, 2], false);
        let n = normalize(&t, &cfg);
        assert!(n.abs().max().double_value(&[]) < 1e-5);
    }

    #[test]
    fn pad_and_crop_keeps_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let t = Tensor::rand([3, 32, 16], tch::kind::FLOAT_CPU);
        let out = pad_and_random_crop(&t, 10, &mut rng);
        assert_eq!(out.size(), vec![3, 32, 16]);
    }

    #[test]
    fn random_erase_changes_some_pixels() {
        let cfg = input_cfg();
        let mut rng = StdRng::seed_from_u64(7);
        let t = Tensor::zeros([3, 64, 32], tch::kind::FLOAT_CPU);
        let out = random_erase(&t, &cfg, &mut rng);
        let changed = out
            .ne(0.0)
            .to_kind(Kind::Float)
            .sum(Kind::Float)
            .double_value(&[]);
        assert!(changed > 0.0);
        assert_eq!(out.size(), t.size());
    }
}
