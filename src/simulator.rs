use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::integrator::integrate;
use crate::trajectory::History;

// プラントの前進シミュレータ。制御器から見た「真値」を生成する
// 設定は生成後に変更できない
#[derive(Debug, Clone)]
pub struct SimulatorSettings<const X: usize> {
    pub t_step: f64,
    // 1ステップの積分分割数
    pub substeps: usize,
    pub x0: na::SVector<f64, X>,
    // 各状態に加わるプロセスノイズの標準偏差 (零ベクトルで無効)
    pub process_noise_std: na::SVector<f64, X>,
    pub seed: u64,
}

impl<const X: usize> Default for SimulatorSettings<X> {
    fn default() -> Self {
        Self {
            t_step: 0.1,
            substeps: 10,
            x0: na::SVector::zeros(),
            process_noise_std: na::SVector::zeros(),
            seed: 0,
        }
    }
}

pub struct Simulator<const X: usize, const U: usize, const P: usize> {
    rhs: fn(&na::SVector<f64, X>, &na::SVector<f64, U>, &na::SVector<f64, P>) -> na::SVector<f64, X>,
    // 時刻から真のパラメータを返す
    p_fun: fn(f64) -> na::SVector<f64, P>,
    t_step: f64,
    substeps: usize,
    noise_std: na::SVector<f64, X>,
    normal: Normal<f64>,
    rng: Xoshiro256PlusPlus,
    t: f64,
    x: na::SVector<f64, X>,
    history: History<X, U>,
}

impl<const X: usize, const U: usize, const P: usize> Simulator<X, U, P> {
    pub fn new(
        settings: SimulatorSettings<X>,
        rhs: fn(&na::SVector<f64, X>, &na::SVector<f64, U>, &na::SVector<f64, P>) -> na::SVector<f64, X>,
        p_fun: fn(f64) -> na::SVector<f64, P>,
    ) -> Self {
        Self {
            rhs,
            p_fun,
            t_step: settings.t_step,
            substeps: settings.substeps,
            noise_std: settings.process_noise_std,
            normal: Normal::new(0.0, 1.0).unwrap(),
            rng: Xoshiro256PlusPlus::seed_from_u64(settings.seed),
            t: 0.0,
            x: settings.x0,
            history: History::new(),
        }
    }

    // 1ステップ前進して次の真の状態を返す
    pub fn make_step(&mut self, u: &na::SVector<f64, U>) -> na::SVector<f64, X> {
        let p = (self.p_fun)(self.t);
        let rhs = self.rhs;
        let mut x_next = integrate(|x| rhs(x, u, &p), &self.x, self.t_step, self.substeps);
        if self.noise_std != na::SVector::<f64, X>::zeros() {
            for i in 0..X {
                x_next[i] += self.noise_std[i] * self.normal.sample(&mut self.rng);
            }
        }
        self.t += self.t_step;
        self.x = x_next;
        self.history.push(self.t, &self.x, u);
        x_next
    }

    pub fn state(&self) -> &na::SVector<f64, X> {
        &self.x
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    // 実験を再実行するときに初期状態を入れ直す
    pub fn set_x0(&mut self, x0: &na::SVector<f64, X>) {
        self.x = *x0;
        self.t = 0.0;
    }

    pub fn reset_history(&mut self) {
        self.history.reset();
    }

    pub fn history(&self) -> &History<X, U> {
        &self.history
    }
}
