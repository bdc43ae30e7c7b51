use rand::seq::SliceRandom;
use rand::Rng;

use crate::market1501::ImageItem;

/// P x K batch sampler: every identity contributes `num_instances` images and
/// identities are shuffled each epoch. Identities with fewer than K images are
/// resampled with replacement, so the triplet loss always sees K instances.
pub struct RandomIdentitySampler {
    groups: Vec<Vec<usize>>,
    num_instances: usize,
}

impl RandomIdentitySampler {
    pub fn new(items: &[ImageItem], num_instances: usize) -> Self {
        let mut by_pid = std::collections::BTreeMap::new();
        for (idx, item) in items.iter().enumerate() {
            by_pid.entry(item.pid).or_insert_with(Vec::new).push(idx);
        }
        Self {
            groups: by_pid.into_values().collect(),
            num_instances: num_instances.max(1),
        }
    }

    /// Number of indices produced per epoch.
    pub fn epoch_len(&self) -> usize {
        self.groups.len() * self.num_instances
    }

    /// One epoch of indices; consecutive runs of K share an identity.
    pub fn sample(&self, rng: &mut impl Rng) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.groups.len()).collect();
        order.shuffle(rng);

        let mut out = Vec::with_capacity(self.epoch_len());
        for gi in order {
            let group = &self.groups[gi];
            if group.len() >= self.num_instances {
                out.extend(
                    group
                        .choose_multiple(rng, self.num_instances)
                        .copied(),
                );
            } else {
                for _ in 0..self.num_instances {
                    out.push(*group.choose(rng).expect("groups are never empty"));
                }
            }
        }
        out
    }
}

/// Plain shuffle over the whole training set.
pub fn shuffled_indices(len: usize, rng: &mut impl Rng) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.shuffle(rng);
    order
}
