use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use optimization_engine::{panoc::*, *};
use rayon::prelude::*;

use crate::integrator::integrate;

// 連続時間モデルの右辺とコスト項は関数ポインタで差し替える
pub type RhsFn<const X: usize, const U: usize, const P: usize> =
    fn(&na::SVector<f64, X>, &na::SVector<f64, U>, &na::SVector<f64, P>) -> na::SVector<f64, X>;
pub type CostFn<const X: usize> = fn(&na::SVector<f64, X>) -> f64;

// 数値微分の刻み幅
const EPS: f64 = 1e-3;

// MPCの設定。生成後は変更不可
#[derive(Debug, Clone)]
pub struct MpcSettings<const X: usize, const U: usize, const P: usize> {
    pub n_horizon: usize,
    pub t_step: f64,
    // 予測1ステップの積分分割数 (モータの時定数が短いので粗い積分は発散する)
    pub substeps: usize,
    // ロバスト評価に使うパラメータのシナリオ。1個なら公称MPC
    pub scenarios: Vec<na::SVector<f64, P>>,
    pub u_lower: na::SVector<f64, U>,
    pub u_upper: na::SVector<f64, U>,
    // 状態制約は2乗ヒンジのソフト制約で扱う (±infで無効)
    pub x_lower: na::SVector<f64, X>,
    pub x_upper: na::SVector<f64, X>,
    pub x_penalty: f64,
    // 入力変化量のペナルティ重み
    pub rterm: na::SVector<f64, U>,
    pub tolerance: f64,
    pub lbfgs_memory: usize,
    // 1解あたりの計算時間の上限 [s]
    pub max_solve_time: f64,
}

pub struct Mpc<const X: usize, const U: usize, const P: usize> {
    cfg: MpcSettings<X, U, P>,
    rhs: RhsFn<X, U, P>,
    lterm: CostFn<X>,
    mterm: CostFn<X>,
    cache: PANOCCache,
    // 前回の解 (ウォームスタート用)
    u_seq: Vec<f64>,
    // 直前に適用した入力 (変化量ペナルティの基準)
    u_prev: na::SVector<f64, U>,
    // 直近の解に対するシナリオごとの予測軌道
    predictions: Vec<Vec<na::SVector<f64, X>>>,
}

// ホライゾンコストの評価に必要な定数一式
struct Rollout<'a, const X: usize, const U: usize, const P: usize> {
    cfg: &'a MpcSettings<X, U, P>,
    rhs: RhsFn<X, U, P>,
    lterm: CostFn<X>,
    mterm: CostFn<X>,
    x0: na::SVector<f64, X>,
    u_prev: na::SVector<f64, U>,
}

impl<const X: usize, const U: usize, const P: usize> Rollout<'_, X, U, P> {
    // シナリオ平均のステージコスト + 終端コスト + 入力変化量 + 状態制約ペナルティ
    fn cost(&self, u_seq: &[f64]) -> f64 {
        let cfg = self.cfg;
        let mut c = 0.0;
        for p in &cfg.scenarios {
            let mut x = self.x0;
            for k in 0..cfg.n_horizon {
                let u = na::SVector::<f64, U>::from_column_slice(&u_seq[k * U..(k + 1) * U]);
                let rhs = self.rhs;
                x = integrate(|x| rhs(x, &u, p), &x, cfg.t_step, cfg.substeps);
                c += (self.lterm)(&x) + self.bound_penalty(&x);
            }
            c += (self.mterm)(&x);
        }
        c /= cfg.scenarios.len() as f64;

        let mut prev = self.u_prev;
        for k in 0..cfg.n_horizon {
            let u = na::SVector::<f64, U>::from_column_slice(&u_seq[k * U..(k + 1) * U]);
            for i in 0..U {
                c += cfg.rterm[i] * (u[i] - prev[i]).powi(2);
            }
            prev = u;
        }
        c
    }

    fn bound_penalty(&self, x: &na::SVector<f64, X>) -> f64 {
        let cfg = self.cfg;
        let mut c = 0.0;
        for i in 0..X {
            let over = (x[i] - cfg.x_upper[i]).max(0.0);
            let under = (cfg.x_lower[i] - x[i]).max(0.0);
            c += cfg.x_penalty * (over * over + under * under);
        }
        c
    }

    // コスト勾配を中心差分で求める (並列化版)
    fn grad(&self, u_seq: &[f64], grad: &mut [f64]) {
        grad.par_iter_mut().enumerate().for_each(|(i, g)| {
            let mut u = u_seq.to_vec();
            u[i] += EPS;
            let posi = self.cost(&u);
            u[i] -= 2.0 * EPS;
            let nega = self.cost(&u);
            *g = (posi - nega) / (2.0 * EPS);
        });
    }

    fn predict(&self, p: &na::SVector<f64, P>, u_seq: &[f64]) -> Vec<na::SVector<f64, X>> {
        let cfg = self.cfg;
        let mut x = self.x0;
        let mut traj = Vec::with_capacity(cfg.n_horizon + 1);
        traj.push(x);
        for k in 0..cfg.n_horizon {
            let u = na::SVector::<f64, U>::from_column_slice(&u_seq[k * U..(k + 1) * U]);
            let rhs = self.rhs;
            x = integrate(|x| rhs(x, &u, p), &x, cfg.t_step, cfg.substeps);
            traj.push(x);
        }
        traj
    }
}

impl<const X: usize, const U: usize, const P: usize> Mpc<X, U, P> {
    pub fn new(
        cfg: MpcSettings<X, U, P>,
        rhs: RhsFn<X, U, P>,
        lterm: CostFn<X>,
        mterm: CostFn<X>,
    ) -> Self {
        let dim = U * cfg.n_horizon;
        let cache = PANOCCache::new(dim, cfg.tolerance, cfg.lbfgs_memory);
        Self {
            cfg,
            rhs,
            lterm,
            mterm,
            cache,
            u_seq: vec![0.0; dim],
            u_prev: na::SVector::zeros(),
            predictions: Vec::new(),
        }
    }

    pub fn settings(&self) -> &MpcSettings<X, U, P> {
        &self.cfg
    }

    // 現在状態から最適入力列を解き、先頭の入力を返す
    // ソルバが失敗したらその時点で打ち切る (リトライしない)
    pub fn make_step(&mut self, x0: &na::SVector<f64, X>) -> Result<na::SVector<f64, U>> {
        let cfg = &self.cfg;
        let rollout = Rollout {
            cfg,
            rhs: self.rhs,
            lterm: self.lterm,
            mterm: self.mterm,
            x0: *x0,
            u_prev: self.u_prev,
        };

        // ウォームスタート: 前回の解を1ステップ分シフト (末尾は最後の入力の繰り返し)
        let dim = U * cfg.n_horizon;
        let mut u_seq = self.u_seq.clone();
        if cfg.n_horizon > 1 {
            u_seq.copy_within(U.., 0);
        }

        let mut lb = Vec::with_capacity(dim);
        let mut ub = Vec::with_capacity(dim);
        for _ in 0..cfg.n_horizon {
            lb.extend(cfg.u_lower.iter());
            ub.extend(cfg.u_upper.iter());
        }

        let cost_f = |u: &[f64], c: &mut f64| -> Result<(), SolverError> {
            *c = rollout.cost(u);
            Ok(())
        };
        let grad_f = |u: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
            rollout.grad(u, grad);
            Ok(())
        };

        let bounds = constraints::Rectangle::new(Some(&lb), Some(&ub));
        let problem = Problem::new(&bounds, grad_f, cost_f);
        let mut panoc = PANOCOptimizer::new(problem, &mut self.cache)
            .with_max_iter(usize::MAX)
            .with_max_duration(Duration::from_secs_f64(cfg.max_solve_time));
        panoc
            .solve(&mut u_seq)
            .map_err(|e| anyhow!("mpc solver failed: {:?}", e))?;

        let u0 = na::SVector::<f64, U>::from_column_slice(&u_seq[..U]);
        if u0.iter().any(|v| !v.is_finite()) {
            bail!("mpc returned a non-finite input: {:?}", u0);
        }

        self.predictions = cfg
            .scenarios
            .iter()
            .map(|p| rollout.predict(p, &u_seq))
            .collect();
        self.u_seq = u_seq;
        self.u_prev = u0;
        Ok(u0)
    }

    // 直近の解のシナリオごとの予測軌道 (予測点数はホライゾン+1)
    pub fn predictions(&self) -> &[Vec<na::SVector<f64, X>>] {
        &self.predictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model;
    use na::vector;
    use std::f64::consts::PI;

    fn lterm(x: &model::State) -> f64 {
        x[0] * x[0] + x[1] * x[1] + x[2] * x[2]
    }

    fn test_settings() -> MpcSettings<8, 2, 3> {
        MpcSettings {
            n_horizon: 8,
            t_step: 0.1,
            substeps: 10,
            scenarios: vec![model::nominal_inertia()],
            u_lower: vector![-2.0 * PI, -2.0 * PI],
            u_upper: vector![2.0 * PI, 2.0 * PI],
            x_lower: na::SVector::from_element(f64::NEG_INFINITY),
            x_upper: na::SVector::from_element(f64::INFINITY),
            x_penalty: 1e2,
            rterm: vector![1e-2, 1e-2],
            tolerance: 1e-6,
            lbfgs_memory: 20,
            max_solve_time: 2.0,
        }
    }

    #[test]
    fn origin_is_a_fixed_point_of_the_controller() {
        // 原点では動かす理由がないので入力はほぼ零
        let mut mpc = Mpc::new(test_settings(), model::rhs, lterm, lterm);
        let u = mpc.make_step(&model::State::zeros()).unwrap();
        assert!(u.amax() < 1e-3);
    }

    #[test]
    fn input_respects_bounds() {
        let mut mpc = Mpc::new(test_settings(), model::rhs, lterm, lterm);
        let x0 = vector![PI, PI, -1.5 * PI, PI, -PI, PI, 0.0, 0.0];
        let u = mpc.make_step(&x0).unwrap();
        for i in 0..2 {
            assert!(u[i] >= -2.0 * PI - 1e-9 && u[i] <= 2.0 * PI + 1e-9);
        }
    }

    #[test]
    fn predictions_cover_every_scenario() {
        let mut cfg = test_settings();
        cfg.scenarios = model::inertia_scenarios();
        let n_scenarios = cfg.scenarios.len();
        let n_horizon = cfg.n_horizon;
        let mut mpc = Mpc::new(cfg, model::rhs, lterm, lterm);
        let x0 = vector![0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        mpc.make_step(&x0).unwrap();
        assert_eq!(mpc.predictions().len(), n_scenarios);
        for traj in mpc.predictions() {
            assert_eq!(traj.len(), n_horizon + 1);
            assert_eq!(traj[0], x0);
        }
    }

    #[test]
    fn soft_state_bounds_penalize_excursions() {
        let cfg = test_settings();
        let rollout = Rollout {
            cfg: &cfg,
            rhs: model::rhs,
            lterm,
            mterm: lterm,
            x0: model::State::zeros(),
            u_prev: model::Input::zeros(),
        };
        assert_eq!(rollout.bound_penalty(&model::State::zeros()), 0.0);

        let mut tight = cfg.clone();
        tight.x_upper = na::SVector::from_element(1.0);
        tight.x_lower = na::SVector::from_element(-1.0);
        let rollout = Rollout {
            cfg: &tight,
            rhs: model::rhs,
            lterm,
            mterm: lterm,
            x0: model::State::zeros(),
            u_prev: model::Input::zeros(),
        };
        assert!(rollout.bound_penalty(&na::SVector::from_element(2.0)) > 0.0);
    }
}
