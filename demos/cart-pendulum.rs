extern crate nalgebra as na;
use anyhow::{bail, Result};
use na::vector;
use osc_mpc::config::Settings;
use osc_mpc::mpc::{Mpc, MpcSettings};
use osc_mpc::pendulum;
use osc_mpc::simulator::{Simulator, SimulatorSettings};
use osc_mpc::timing::LatencyStats;
use std::time::Instant;

// 台車上の倒立振子をMPCで直立に保つ

const T_STEP: f64 = 0.04;
const N_LOOP: usize = 100;
// 台車への力の上限 [N]
const F_MAX: f64 = 5.0;

fn p_fun(_t: f64) -> pendulum::NoParams {
    pendulum::NoParams::zeros()
}

// 振子角を最優先、台車位置と速度は弱く抑える
fn lterm(x: &pendulum::State) -> f64 {
    10.0 * x[2] * x[2] + x[0] * x[0] + 0.1 * x[1] * x[1] + 0.1 * x[3] * x[3]
}

fn main() -> Result<()> {
    let settings = Settings::default();
    std::fs::create_dir_all(&settings.base_path)?;

    // 直立からずらした初期状態
    let x0: pendulum::State = vector![0.0, 0.0, 0.25, 0.0];

    let mpc_cfg = MpcSettings {
        n_horizon: settings.horizon,
        t_step: T_STEP,
        substeps: 10,
        scenarios: vec![pendulum::NoParams::zeros()],
        u_lower: vector![-F_MAX],
        u_upper: vector![F_MAX],
        x_lower: na::SVector::from_element(f64::NEG_INFINITY),
        x_upper: na::SVector::from_element(f64::INFINITY),
        x_penalty: 1e2,
        rterm: vector![1e-2],
        tolerance: 1e-6,
        lbfgs_memory: 20,
        max_solve_time: T_STEP,
    };
    let mut mpc = Mpc::new(mpc_cfg, pendulum::rhs, lterm, lterm);

    let sim_cfg = SimulatorSettings {
        t_step: T_STEP,
        substeps: 10,
        x0,
        ..Default::default()
    };
    let mut sim = Simulator::new(sim_cfg, pendulum::rhs, p_fun);

    let mut time_mpc = LatencyStats::new();
    let mut x = x0;
    for i in 0..N_LOOP {
        let tic = Instant::now();
        let u = mpc.make_step(&x)?;
        time_mpc.record(tic.elapsed());

        x = sim.make_step(&u);

        if i % 10 == 0 {
            println!(
                "t: {:.2}, u: {:6.2}, x: [{:6.3}, {:6.3}, {:6.3}, {:6.3}]",
                sim.time(),
                u[0],
                x[0],
                x[1],
                x[2],
                x[3]
            );
        }
        // 倒れたら終了
        if x[2].abs() > std::f64::consts::PI / 2.0 {
            bail!("theta exceeded pi/2 at step {i}");
        }
    }
    sim.history().save_csv(settings.base_path.join("cart-pendulum.csv"))?;

    time_mpc.report("mpc");
    Ok(())
}
