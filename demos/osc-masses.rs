extern crate nalgebra as na;
use anyhow::{bail, Result};
use na::vector;
use osc_mpc::config::Settings;
use osc_mpc::mhe::{Mhe, MheSettings};
use osc_mpc::model;
use osc_mpc::mpc::{Mpc, MpcSettings};
use osc_mpc::simulator::{Simulator, SimulatorSettings};
use osc_mpc::timing::LatencyStats;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::f64::consts::PI;
use std::time::Instant;

// 2モータ, 3ディスク, 4ばねの回転系の閉ループ:
// MPCで制御し、MHEで状態とディスク1の慣性モーメントを推定する

const T_STEP: f64 = 0.1;
// 非制御応答のステップ数
const N_SIM: usize = 200;
// 閉ループのステップ数
const N_LOOP: usize = 20;
// 観測ノイズの標準偏差 [rad]
const MEAS_STD: f64 = 1e-2;

// MARK: - Model
// 真の慣性モーメント (不確かさなし)
fn p_fun(_t: f64) -> model::Inertia {
    model::nominal_inertia()
}

// 角度計の観測 (ノイズ付き)
fn sensor(x: &model::State, rng: &mut Xoshiro256PlusPlus) -> model::Measurement {
    let dist = Normal::new(0.0, MEAS_STD).unwrap();
    model::measure(x) + vector![dist.sample(rng), dist.sample(rng), dist.sample(rng)]
}

// ステージコスト・終端コスト: 全ディスク角の2乗和
fn lterm(x: &model::State) -> f64 {
    x[0] * x[0] + x[1] * x[1] + x[2] * x[2]
}

// MARK: - Main
fn main() -> Result<()> {
    let settings = Settings::default();
    std::fs::create_dir_all(&settings.base_path)?;
    let stamp = chrono::Local::now().format("%m%d-%H%M%S").to_string();

    // 初期状態はあえて非零にする
    let x0: model::State = vector![1.0, 1.0, -1.5, 1.0, -1.0, 1.0, 0.0, 0.0] * PI;

    // MARK: - MPC
    let bound = 2.0 * PI;
    let inf = f64::INFINITY;
    let mpc_cfg = MpcSettings {
        n_horizon: settings.horizon,
        t_step: T_STEP,
        substeps: 10,
        scenarios: model::inertia_scenarios(),
        u_lower: vector![-bound, -bound],
        u_upper: vector![bound, bound],
        x_lower: vector![-bound, -bound, -bound, -inf, -inf, -inf, -inf, -inf],
        x_upper: vector![bound, bound, bound, inf, inf, inf, inf, inf],
        x_penalty: 1e2,
        rterm: vector![1e-2, 1e-2],
        tolerance: 1e-6,
        lbfgs_memory: 20,
        max_solve_time: T_STEP,
    };
    let mut mpc = Mpc::new(mpc_cfg, model::rhs, lterm, lterm);

    // MARK: - Simulator
    let sim_cfg = SimulatorSettings {
        t_step: T_STEP,
        substeps: 10,
        x0,
        ..Default::default()
    };
    let mut sim = Simulator::new(sim_cfg, model::rhs, p_fun);

    // MARK: - MHE
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    // 推定器にはあえて悪い初期値を与える
    let dist = Normal::new(0.0, 1.0).unwrap();
    let x0_mhe = x0.map(|v| v * (1.0 + 0.5 * dist.sample(&mut rng)));
    let mhe_cfg = MheSettings {
        n_horizon: 10,
        t_step: T_STEP,
        substeps: 10,
        p_nominal: model::nominal_inertia(),
        // ディスク1の慣性モーメントを推定する
        p_est: vec![(0, 1e-5, 1e-3)],
        arrival_weight: na::SVector::from_element(1.0),
        meas_weight: vector![1.0, 1.0, 1.0],
        p_weight: 10.0,
        x0: x0_mhe,
        p0: vec![1e-4],
        tolerance: 1e-6,
        lbfgs_memory: 20,
        max_solve_time: 0.05,
    };
    let mut mhe = Mhe::new(mhe_cfg, model::rhs, model::measure);

    // MARK: - 非制御応答
    // 制御なしでは摩擦で減衰するだけで整定には程遠い (比較用のベースライン)
    let now = Instant::now();
    for _ in 0..N_SIM {
        sim.make_step(&model::Input::zeros());
    }
    println!(
        "uncontrolled: {} steps, elapsed {:.2} sec",
        N_SIM,
        now.elapsed().as_secs_f64()
    );
    sim.history()
        .save_csv(settings.base_path.join(format!("osc-uncontrolled-{stamp}.csv")))?;

    // MARK: - 閉ループ
    sim.reset_history();
    sim.set_x0(&x0);
    let mut time_mpc = LatencyStats::new();
    let mut time_mhe = LatencyStats::new();
    let mut x_est = x0_mhe;

    for i in 0..N_LOOP {
        let tic = Instant::now();
        let u = mpc.make_step(&x_est)?;
        time_mpc.record(tic.elapsed());

        // シミュレータは制御ループの一部ではないので計時しない
        let x = sim.make_step(&u);

        let y = sensor(&x, &mut rng);
        let tic = Instant::now();
        let (xe, p_est) = mhe.make_step(&y, &u)?;
        time_mhe.record(tic.elapsed());
        x_est = xe;

        println!(
            "{i:3}/{N_LOOP}, u: [{:6.2},{:6.2}], phi: [{:6.2},{:6.2},{:6.2}], est: [{:6.2},{:6.2},{:6.2}], Theta_1: {:.3e}",
            u[0], u[1], x[0], x[1], x[2], x_est[0], x_est[1], x_est[2], p_est[0]
        );

        if x.iter().any(|v| !v.is_finite()) {
            bail!("state diverged at step {i}");
        }
    }
    sim.history()
        .save_csv(settings.base_path.join(format!("osc-closed-loop-{stamp}.csv")))?;

    time_mpc.report("mpc");
    time_mhe.report("mhe");
    Ok(())
}
