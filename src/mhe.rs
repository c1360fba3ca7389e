use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use optimization_engine::{panoc::*, *};
use rayon::prelude::*;

use crate::integrator::integrate;
use crate::mpc::RhsFn;

// 観測関数も右辺と同じく関数ポインタで差し替える
pub type MeasFn<const X: usize, const M: usize> =
    fn(&na::SVector<f64, X>) -> na::SVector<f64, M>;

// 数値微分の基準刻み幅。決定変数のスケールに合わせて相対化する
const EPS: f64 = 1e-3;

// 移動ホライゾン推定器 (MHE) の設定。生成後は変更不可
#[derive(Debug, Clone)]
pub struct MheSettings<const X: usize, const U: usize, const P: usize, const M: usize> {
    pub n_horizon: usize,
    pub t_step: f64,
    pub substeps: usize,
    // 公称パラメータ。推定対象でない成分はこの値に固定される
    pub p_nominal: na::SVector<f64, P>,
    // 推定するパラメータの (添字, 下限, 上限)
    pub p_est: Vec<(usize, f64, f64)>,
    // 到達コストの重み (対角)
    pub arrival_weight: na::SVector<f64, X>,
    // 観測残差の重み (対角)
    pub meas_weight: na::SVector<f64, M>,
    // パラメータ事前値からの逸脱の重み
    pub p_weight: f64,
    // ウィンドウ先頭の状態の初期推定
    pub x0: na::SVector<f64, X>,
    // p_est と同順のパラメータ初期推定
    pub p0: Vec<f64>,
    pub tolerance: f64,
    pub lbfgs_memory: usize,
    pub max_solve_time: f64,
}

pub struct Mhe<const X: usize, const U: usize, const P: usize, const M: usize> {
    cfg: MheSettings<X, U, P, M>,
    rhs: RhsFn<X, U, P>,
    hx: MeasFn<X, M>,
    cache: PANOCCache,
    // 末尾が最新の (観測, 入力)。長さはホライゾンまで伸びてからスライドする
    window: VecDeque<(na::SVector<f64, M>, na::SVector<f64, U>)>,
    // ウィンドウ先頭の状態の事前推定 (到達コストの基準)
    x_prior: na::SVector<f64, X>,
    p_prior: Vec<f64>,
    // 前回の解 [ウィンドウ先頭の状態; 推定パラメータ]
    z: Vec<f64>,
}

// ウィンドウコストの評価に必要な定数一式
struct Window<'a, const X: usize, const U: usize, const P: usize, const M: usize> {
    cfg: &'a MheSettings<X, U, P, M>,
    rhs: RhsFn<X, U, P>,
    hx: MeasFn<X, M>,
    data: &'a [(na::SVector<f64, M>, na::SVector<f64, U>)],
    x_prior: na::SVector<f64, X>,
    p_prior: &'a [f64],
}

impl<const X: usize, const U: usize, const P: usize, const M: usize> Window<'_, X, U, P, M> {
    // 到達コスト + パラメータ事前値からの逸脱 + 観測残差の重み付き2乗和
    fn cost(&self, z: &[f64]) -> f64 {
        let cfg = self.cfg;
        let x0 = na::SVector::<f64, X>::from_column_slice(&z[..X]);
        let p = assemble(cfg, &z[X..]);

        let mut c = 0.0;
        for i in 0..X {
            c += cfg.arrival_weight[i] * (x0[i] - self.x_prior[i]).powi(2);
        }
        for (j, _) in cfg.p_est.iter().enumerate() {
            c += cfg.p_weight * (z[X + j] - self.p_prior[j]).powi(2);
        }

        let mut x = x0;
        for (y, u) in self.data {
            let rhs = self.rhs;
            x = integrate(|x| rhs(x, u, &p), &x, cfg.t_step, cfg.substeps);
            let residual = y - (self.hx)(&x);
            for i in 0..M {
                c += cfg.meas_weight[i] * residual[i] * residual[i];
            }
        }
        c
    }

    // コスト勾配を中心差分で求める (並列化版)
    fn grad(&self, z: &[f64], grad: &mut [f64]) {
        grad.par_iter_mut().enumerate().for_each(|(i, g)| {
            let h = if z[i].abs() > 1e-9 { EPS * z[i].abs() } else { EPS };
            let mut z_pert = z.to_vec();
            z_pert[i] += h;
            let posi = self.cost(&z_pert);
            z_pert[i] -= 2.0 * h;
            let nega = self.cost(&z_pert);
            *g = (posi - nega) / (2.0 * h);
        });
    }

    // ウィンドウ末尾 (現在時刻) の状態まで前進させる
    fn propagate(&self, z: &[f64]) -> na::SVector<f64, X> {
        let cfg = self.cfg;
        let p = assemble(cfg, &z[X..]);
        let mut x = na::SVector::<f64, X>::from_column_slice(&z[..X]);
        for (_, u) in self.data {
            let rhs = self.rhs;
            x = integrate(|x| rhs(x, u, &p), &x, cfg.t_step, cfg.substeps);
        }
        x
    }
}

// 推定パラメータを公称値に重ねて完全なパラメータベクトルを作る
fn assemble<const X: usize, const U: usize, const P: usize, const M: usize>(
    cfg: &MheSettings<X, U, P, M>,
    p_est_vals: &[f64],
) -> na::SVector<f64, P> {
    let mut p = cfg.p_nominal;
    for (j, (idx, _, _)) in cfg.p_est.iter().enumerate() {
        p[*idx] = p_est_vals[j];
    }
    p
}

impl<const X: usize, const U: usize, const P: usize, const M: usize> Mhe<X, U, P, M> {
    pub fn new(cfg: MheSettings<X, U, P, M>, rhs: RhsFn<X, U, P>, hx: MeasFn<X, M>) -> Self {
        let dim = X + cfg.p_est.len();
        let cache = PANOCCache::new(dim, cfg.tolerance, cfg.lbfgs_memory);
        let mut z = Vec::with_capacity(dim);
        z.extend(cfg.x0.iter());
        z.extend(cfg.p0.iter());
        let x_prior = cfg.x0;
        let p_prior = cfg.p0.clone();
        Self {
            cfg,
            rhs,
            hx,
            cache,
            window: VecDeque::new(),
            x_prior,
            p_prior,
            z,
        }
    }

    pub fn settings(&self) -> &MheSettings<X, U, P, M> {
        &self.cfg
    }

    // 新しい (観測, 入力) を取り込み、現在状態とパラメータの推定値を返す
    pub fn make_step(
        &mut self,
        y: &na::SVector<f64, M>,
        u: &na::SVector<f64, U>,
    ) -> Result<(na::SVector<f64, X>, na::SVector<f64, P>)> {
        self.window.push_back((*y, *u));
        // あふれた分だけ事前推定と前回解を1ステップ前進させる (到達コストのシフト)
        if self.window.len() > self.cfg.n_horizon {
            if let Some((_, u_old)) = self.window.pop_front() {
                let p = assemble(&self.cfg, &self.z[X..]);
                let rhs = self.rhs;
                let (t_step, substeps) = (self.cfg.t_step, self.cfg.substeps);
                self.x_prior =
                    integrate(|x| rhs(x, &u_old, &p), &self.x_prior, t_step, substeps);
                let z_state = na::SVector::<f64, X>::from_column_slice(&self.z[..X]);
                let z_next = integrate(|x| rhs(x, &u_old, &p), &z_state, t_step, substeps);
                self.z[..X].copy_from_slice(z_next.as_slice());
            }
        }

        let cfg = &self.cfg;
        let data: Vec<_> = self.window.iter().cloned().collect();
        let window = Window {
            cfg,
            rhs: self.rhs,
            hx: self.hx,
            data: &data,
            x_prior: self.x_prior,
            p_prior: &self.p_prior,
        };

        let dim = X + cfg.p_est.len();
        let mut lb = vec![f64::NEG_INFINITY; dim];
        let mut ub = vec![f64::INFINITY; dim];
        for (j, (_, lo, hi)) in cfg.p_est.iter().enumerate() {
            lb[X + j] = *lo;
            ub[X + j] = *hi;
        }

        let cost_f = |z: &[f64], c: &mut f64| -> Result<(), SolverError> {
            *c = window.cost(z);
            Ok(())
        };
        let grad_f = |z: &[f64], grad: &mut [f64]| -> Result<(), SolverError> {
            window.grad(z, grad);
            Ok(())
        };

        let bounds = constraints::Rectangle::new(Some(&lb), Some(&ub));
        let problem = Problem::new(&bounds, grad_f, cost_f);
        let mut panoc = PANOCOptimizer::new(problem, &mut self.cache)
            .with_max_iter(usize::MAX)
            .with_max_duration(Duration::from_secs_f64(cfg.max_solve_time));
        panoc
            .solve(&mut self.z)
            .map_err(|e| anyhow!("mhe solver failed: {:?}", e))?;

        if self.z.iter().any(|v| !v.is_finite()) {
            bail!("mhe returned a non-finite estimate");
        }

        let x_est = window.propagate(&self.z);
        let p_est = assemble(cfg, &self.z[X..]);
        self.p_prior = self.z[X..].to_vec();
        Ok((x_est, p_est))
    }
}
