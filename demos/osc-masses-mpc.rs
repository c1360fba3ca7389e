extern crate nalgebra as na;
use anyhow::{bail, Result};
use na::vector;
use osc_mpc::config::Settings;
use osc_mpc::model;
use osc_mpc::mpc::{Mpc, MpcSettings};
use osc_mpc::simulator::{Simulator, SimulatorSettings};
use osc_mpc::timing::LatencyStats;
use std::f64::consts::PI;
use std::time::Instant;

// 2モータ, 3ディスク, 4ばねの回転系を真の状態のフィードバックで制御する
// (推定器なしの素のMPC)

const T_STEP: f64 = 0.1;
const N_SIM: usize = 200;
const N_LOOP: usize = 20;

fn p_fun(_t: f64) -> model::Inertia {
    model::nominal_inertia()
}

fn lterm(x: &model::State) -> f64 {
    x[0] * x[0] + x[1] * x[1] + x[2] * x[2]
}

fn main() -> Result<()> {
    let settings = Settings::default();
    std::fs::create_dir_all(&settings.base_path)?;

    let x0: model::State = vector![1.0, 1.0, -1.5, 1.0, -1.0, 1.0, 0.0, 0.0] * PI;

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

    let sim_cfg = SimulatorSettings {
        t_step: T_STEP,
        substeps: 10,
        x0,
        ..Default::default()
    };
    let mut sim = Simulator::new(sim_cfg, model::rhs, p_fun);

    // MARK: - 非制御応答
    let now = Instant::now();
    for _ in 0..N_SIM {
        sim.make_step(&model::Input::zeros());
    }
    println!(
        "uncontrolled: {} steps, elapsed {:.2} sec",
        N_SIM,
        now.elapsed().as_secs_f64()
    );
    sim.history().save_csv(settings.base_path.join("osc-mpc-uncontrolled.csv"))?;

    // MARK: - 1ステップだけ解いて予測を確認
    sim.reset_history();
    sim.set_x0(&x0);
    let now = Instant::now();
    let u0 = mpc.make_step(&x0)?;
    println!(
        "single step: u = [{:6.2},{:6.2}], elapsed {:.3} sec, {} predicted trajectories",
        u0[0],
        u0[1],
        now.elapsed().as_secs_f64(),
        mpc.predictions().len()
    );

    // MARK: - 閉ループ
    let mut time_mpc = LatencyStats::new();
    let mut x = x0;
    for i in 0..N_LOOP {
        let tic = Instant::now();
        let u = mpc.make_step(&x)?;
        time_mpc.record(tic.elapsed());

        x = sim.make_step(&u);

        println!(
            "{i:3}/{N_LOOP}, u: [{:6.2},{:6.2}], phi: [{:6.2},{:6.2},{:6.2}]",
            u[0], u[1], x[0], x[1], x[2]
        );

        if x.iter().any(|v| !v.is_finite()) {
            bail!("state diverged at step {i}");
        }
    }
    sim.history().save_csv(settings.base_path.join("osc-mpc-closed-loop.csv"))?;

    time_mpc.report("mpc");
    Ok(())
}
