use reid_core::cfg::SolverCfg;

/// Warmup + multi-step decay learning-rate schedule.
///
/// All positions are expressed as fractions of the total scheduled epochs, so
/// querying takes just the training progress `pct` in [0, 1]. During warmup
/// the rate ramps linearly from `start * warmup_factor` up to `start`; after
/// that each milestone crossing multiplies the rate by `gamma`.
#[derive(Debug, Clone)]
pub struct WarmupMultiStep {
    gamma: f64,
    milestones: Vec<f64>,
    warmup_iter: f64,
    warmup_factor: f64,
}

impl WarmupMultiStep {
    pub fn new(gamma: f64, milestones: Vec<f64>, warmup_iter: f64, warmup_factor: f64) -> Self {
        Self {
            gamma,
            milestones,
            warmup_iter,
            warmup_factor,
        }
    }

    /// Derives the schedule constants from solver options by dividing the
    /// configured decay epochs and warmup length by the epoch count.
    pub fn from_solver(solver: &SolverCfg) -> Self {
        let max_epochs = solver.max_epochs.max(1) as f64;
        Self::new(
            solver.gamma,
            solver.steps.iter().map(|&s| s as f64 / max_epochs).collect(),
            solver.warmup_iters as f64 / max_epochs,
            solver.warmup_factor,
        )
    }

    /// Learning rate at progress `pct` in [0, 1].
    ///
    /// `end` is accepted for interface parity with annealing schedules but
    /// does not participate in the rate.
    /// A zero `warmup_iter` means no warmup phase at all.
    pub fn lr_at(&self, start: f64, _end: f64, pct: f64) -> f64 {
        let warmup_factor = if self.warmup_iter > 0.0 && pct < self.warmup_iter {
            let alpha = pct / self.warmup_iter;
            self.warmup_factor * (1.0 - alpha) + alpha
        } else {
            1.0
        };
        // right-biased: pct sitting exactly on a milestone counts as past it
        let crossed = self.milestones.partition_point(|&m| m <= pct);
        start * warmup_factor * self.gamma.powi(crossed as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sched() -> WarmupMultiStep {
        WarmupMultiStep::new(0.1, vec![0.4, 0.8], 0.1, 0.1)
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn worked_example() {
        let s = sched();
        assert_close(s.lr_at(1.0, 0.0, 0.0), 0.1);
        // alpha = 0.5 -> factor 0.55
        assert_close(s.lr_at(1.0, 0.0, 0.05), 0.55);
        assert_close(s.lr_at(1.0, 0.0, 0.1), 1.0);
        assert_close(s.lr_at(1.0, 0.0, 0.4), 0.1);
        assert_close(s.lr_at(1.0, 0.0, 0.9), 0.01);
    }

    #[test]
    fn milestone_crossing_is_right_biased() {
        let s = sched();
        // exactly on the i-th milestone the rate already includes gamma^(i+1)
        assert_close(s.lr_at(1.0, 0.0, 0.4), 0.1);
        assert_close(s.lr_at(1.0, 0.0, 0.8), 0.01);
    }

    #[test]
    fn plateau_between_warmup_and_first_milestone() {
        let s = sched();
        for pct in [0.1, 0.2, 0.3, 0.399] {
            assert_close(s.lr_at(1.0, 0.0, pct), 1.0);
        }
    }

    #[test]
    fn non_increasing_after_warmup() {
        let s = sched();
        let mut prev = f64::INFINITY;
        let mut pct = 0.1;
        while pct <= 1.0 {
            let lr = s.lr_at(1.0, 0.0, pct);
            assert!(lr <= prev + 1e-12);
            prev = lr;
            pct += 0.01;
        }
    }

    #[test]
    fn pct_one_crosses_all_milestones() {
        let s = sched();
        assert_close(s.lr_at(1.0, 0.0, 1.0), 0.01);
    }

    #[test]
    fn zero_warmup_means_no_ramp() {
        let s = WarmupMultiStep::new(0.1, vec![0.5], 0.0, 0.1);
        assert_close(s.lr_at(2.0, 0.0, 0.0), 2.0);
        assert_close(s.lr_at(2.0, 0.0, 0.5), 0.2);
    }

    #[test]
    fn end_value_is_inert() {
        let s = sched();
        assert_close(s.lr_at(1.0, 0.0, 0.25), s.lr_at(1.0, 123.0, 0.25));
    }

    #[test]
    fn from_solver_divides_by_max_epochs() {
        let mut solver = reid_core::Config::default().solver;
        solver.max_epochs = 100;
        solver.steps = vec![40, 70];
        solver.warmup_iters = 10;
        solver.gamma = 0.1;
        solver.warmup_factor = 0.25;
        let s = WarmupMultiStep::from_solver(&solver);
        assert_close(s.lr_at(1.0, 0.0, 0.0), 0.25);
        assert_close(s.lr_at(1.0, 0.0, 0.4), 0.1);
        assert_close(s.lr_at(1.0, 0.0, 0.7), 0.01);
    }
}
