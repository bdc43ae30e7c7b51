use tch::{Kind, Tensor};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("no query features were accumulated")]
    EmptyQuery,

    #[error("no query has a valid gallery match")]
    NoValidQuery,

    #[error("label count {labels} does not match feature count {feats}")]
    LabelMismatch { labels: usize, feats: usize },
}

/// L2-normalizes feature rows.
pub fn normalize(feats: &Tensor) -> Tensor {
    let norm = feats
        .pow_tensor_scalar(2.0)
        .sum_dim_intlist(Some(&[-1][..]), true, Kind::Float)
        .sqrt();
    feats / (norm + 1e-8)
}

/// Euclidean distance matrix between query rows and gallery rows.
pub fn euclidean_distmat(query: &Tensor, gallery: &Tensor) -> Tensor {
    let q2 = query
        .pow_tensor_scalar(2.0)
        .sum_dim_intlist(Some(&[1][..]), true, Kind::Float);
    let g2 = gallery
        .pow_tensor_scalar(2.0)
        .sum_dim_intlist(Some(&[1][..]), true, Kind::Float)
        .transpose(0, 1);
    let dist = &q2 + &g2 - query.matmul(&gallery.transpose(0, 1)) * 2.0;
    dist.clamp_min(1e-12).sqrt()
}

/// CMC curve and mean average precision under the Market-1501 protocol.
///
/// For each query, gallery entries that share both the person id and the
/// camera id with the query are dropped before ranking. Queries without any
/// remaining true match do not count toward the averages.
pub fn cmc_map(
    distmat: &Tensor,
    q_pids: &[i64],
    g_pids: &[i64],
    q_camids: &[i64],
    g_camids: &[i64],
    max_rank: usize,
) -> Result<(Vec<f64>, f64), EvalError> {
    let num_q = q_pids.len();
    let num_g = g_pids.len();
    if num_q == 0 || num_g == 0 {
        return Err(EvalError::EmptyQuery);
    }
    let max_rank = max_rank.min(num_g).max(1);

    let sorted = distmat
        .argsort(1, false)
        .to_device(tch::Device::Cpu)
        .view([-1]);
    let order: Vec<i64> =
        Vec::try_from(&sorted).expect("argsort output is a dense int64 tensor");

    let mut cmc_sum = vec![0f64; max_rank];
    let mut ap_sum = 0f64;
    let mut num_valid_q = 0usize;

    for q in 0..num_q {
        let (q_pid, q_camid) = (q_pids[q], q_camids[q]);
        let ranked = &order[q * num_g..(q + 1) * num_g];

        // true/false match flags after dropping same-pid same-cam entries
        let matches: Vec<bool> = ranked
            .iter()
            .map(|&g| (g_pids[g as usize], g_camids[g as usize]))
            .filter(|&(pid, camid)| !(pid == q_pid && camid == q_camid))
            .map(|(pid, _)| pid == q_pid)
            .collect();

        let num_rel = matches.iter().filter(|&&m| m).count();
        if num_rel == 0 {
            // query identity never appears in the gallery under another camera
            continue;
        }
        num_valid_q += 1;

        let first_hit = matches.iter().position(|&m| m).unwrap_or(usize::MAX);
        for (r, slot) in cmc_sum.iter_mut().enumerate() {
            if first_hit <= r {
                *slot += 1.0;
            }
        }

        let mut hits = 0usize;
        let mut ap = 0f64;
        for (rank, &m) in matches.iter().enumerate() {
            if m {
                hits += 1;
                ap += hits as f64 / (rank + 1) as f64;
            }
        }
        ap_sum += ap / num_rel as f64;
    }

    if num_valid_q == 0 {
        return Err(EvalError::NoValidQuery);
    }

    let cmc = cmc_sum
        .into_iter()
        .map(|c| c / num_valid_q as f64)
        .collect();
    Ok((cmc, ap_sum / num_valid_q as f64))
}

/// Accumulates test features batch by batch, then scores retrieval once the
/// full query + gallery set has been seen.
pub struct R1mAP {
    feats: Vec<Tensor>,
    pids: Vec<i64>,
    camids: Vec<i64>,
    num_query: usize,
    max_rank: usize,
    feat_norm: bool,
}

impl R1mAP {
    pub fn new(num_query: usize, max_rank: usize, feat_norm: bool) -> Self {
        Self {
            feats: Vec::new(),
            pids: Vec::new(),
            camids: Vec::new(),
            num_query,
            max_rank,
            feat_norm,
        }
    }

    /// feat: [batch, dim]; labels: `(pid, camid)` per row.
    pub fn update(&mut self, feat: &Tensor, labels: &[(i64, i64)]) {
        self.feats.push(feat.to_device(tch::Device::Cpu));
        for &(pid, camid) in labels {
            self.pids.push(pid);
            self.camids.push(camid);
        }
    }

    pub fn compute(&self) -> Result<(Vec<f64>, f64), EvalError> {
        if self.feats.is_empty() || self.num_query == 0 {
            return Err(EvalError::EmptyQuery);
        }
        let mut feats = Tensor::cat(&self.feats, 0);
        let total = feats.size()[0] as usize;
        if total != self.pids.len() {
            return Err(EvalError::LabelMismatch {
                labels: self.pids.len(),
                feats: total,
            });
        }
        if self.feat_norm {
            feats = normalize(&feats);
        }

        let qf = feats.narrow(0, 0, self.num_query as i64);
        let gf = feats.narrow(0, self.num_query as i64, (total - self.num_query) as i64);
        let distmat = euclidean_distmat(&qf, &gf);

        cmc_map(
            &distmat,
            &self.pids[..self.num_query],
            &self.pids[self.num_query..],
            &self.camids[..self.num_query],
            &self.camids[self.num_query..],
            self.max_rank,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distmat_matches_hand_values() {
        let q = Tensor::from_slice2(&[[0.0f32, 0.0]]);
        let g = Tensor::from_slice2(&[[3.0f32, 4.0], [0.0, 1.0]]);
        let d = euclidean_distmat(&q, &g).view([-1]);
        let row: Vec<f32> = Vec::try_from(&d).unwrap();
        assert!((row[0] - 5.0).abs() < 1e-4);
        assert!((row[1] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn cmc_map_on_hand_checked_case() {
        // q0 ranks its cross-camera match first (after the same-camera copy is
        // dropped); q1 finds its match at rank 1.
        let distmat = Tensor::from_slice2(&[[0.1f32, 0.2, 0.3, 0.4], [0.5, 0.4, 0.3, 0.2]]);
        let q_pids = [1, 2];
        let q_camids = [0, 0];
        let g_pids = [1, 1, 2, 3];
        let g_camids = [0, 1, 1, 0];

        let (cmc, map) = cmc_map(&distmat, &q_pids, &g_pids, &q_camids, &g_camids, 4).unwrap();
        assert!((cmc[0] - 0.5).abs() < 1e-9);
        assert!((cmc[1] - 1.0).abs() < 1e-9);
        assert!((map - 0.75).abs() < 1e-9);
    }

    #[test]
    fn query_without_valid_match_is_skipped() {
        // q1's only gallery copy shares pid and camera, so it is skipped and
        // the averages come from q0 alone
        let distmat = Tensor::from_slice2(&[[0.1f32, 0.9], [0.9, 0.1]]);
        let q_pids = [1, 2];
        let q_camids = [0, 0];
        let g_pids = [1, 2];
        let g_camids = [1, 0];

        let (cmc, map) = cmc_map(&distmat, &q_pids, &g_pids, &q_camids, &g_camids, 2).unwrap();
        assert!((cmc[0] - 1.0).abs() < 1e-9);
        assert!((map - 1.0).abs() < 1e-9);
    }

    #[test]
    fn all_queries_invalid_is_an_error() {
        let distmat = Tensor::from_slice2(&[[0.5f32]]);
        let err = cmc_map(&distmat, &[1], &[1], &[0], &[0], 1).unwrap_err();
        assert!(matches!(err, EvalError::NoValidQuery));
    }

    #[test]
    fn accumulator_round_trip() {
        let mut metric = R1mAP::new(1, 2, true);
        metric.update(&Tensor::from_slice2(&[[1.0f32, 0.0]]), &[(5, 0)]);
        metric.update(
            &Tensor::from_slice2(&[[0.9f32, 0.1], [0.0, 1.0]]),
            &[(5, 1), (6, 1)],
        );
        let (cmc, map) = metric.compute().unwrap();
        assert!((cmc[0] - 1.0).abs() < 1e-9);
        assert!((map - 1.0).abs() < 1e-9);
    }
}
