use na::vector;

// 3枚の回転ディスクを4本のトーションばねで連結し、両端を位置サーボ付きの
// モータで駆動する系 (2モータ, 3ディスク, 4ばね, 粘性摩擦あり)
// 状態変数は phi(3), dphi(3), phi_m(2) の8つ
// 入力はモータの目標角 phi_m_set(2)

pub const X_DIM: usize = 8;
pub const U_DIM: usize = 2;
pub const P_DIM: usize = 3;

pub type State = na::SVector<f64, X_DIM>;
pub type Input = na::SVector<f64, U_DIM>;
pub type Inertia = na::SVector<f64, P_DIM>;
pub type Measurement = na::SVector<f64, 3>;

// ばね定数 [Nm/rad]
pub const C: [f64; 4] = [2.697e-3, 2.66e-3, 3.5e-3, 2.86e-3];
// 粘性摩擦係数 [Nm s/rad]
pub const D: [f64; 3] = [6.78e-5, 8.01e-5, 8.82e-5];
// モータの時定数 [s]
pub const TAU: f64 = 1e-2;
// 慣性モーメントの公称値 [kg m^2]
pub const THETA_NOM: f64 = 2.25e-4;

// 系ダイナミクスを記述
// x = [phi_1, phi_2, phi_3, dphi_1, dphi_2, dphi_3, phi_m_1, phi_m_2]
pub fn rhs(x: &State, u: &Input, theta: &Inertia) -> State {
    let (phi, dphi) = (x.fixed_rows::<3>(0), x.fixed_rows::<3>(3));
    let phi_m = x.fixed_rows::<2>(6);
    vector![
        dphi[0],
        dphi[1],
        dphi[2],
        (-C[0] * (phi[0] - phi_m[0]) - C[1] * (phi[0] - phi[1]) - D[0] * dphi[0]) / theta[0],
        (-C[1] * (phi[1] - phi[0]) - C[2] * (phi[1] - phi[2]) - D[1] * dphi[1]) / theta[1],
        (-C[2] * (phi[2] - phi[1]) - C[3] * (phi[2] - phi_m[1]) - D[2] * dphi[2]) / theta[2],
        (u[0] - phi_m[0]) / TAU,
        (u[1] - phi_m[1]) / TAU,
    ]
}

// 角度計の観測: 各ディスクの角度
pub fn measure(x: &State) -> Measurement {
    x.fixed_rows::<3>(0).into_owned()
}

pub fn nominal_inertia() -> Inertia {
    vector![THETA_NOM, THETA_NOM, THETA_NOM]
}

// ロバストMPC用の慣性モーメントのシナリオ
// ディスク1, 2は公称値の0.9〜1.1倍、ディスク3は公称値のみ
pub fn inertia_scenarios() -> Vec<Inertia> {
    let mut scenarios = Vec::new();
    for t1 in [1.0, 0.9, 1.1] {
        for t2 in [1.0, 0.9, 1.1] {
            scenarios.push(vector![t1, t2, 1.0] * THETA_NOM);
        }
    }
    scenarios
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_equal(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    #[test]
    fn equilibrium_is_fixed_point() {
        // phi == phi_m, dphi == 0, 目標角 == phi_m で微分は厳密に零
        let a = 0.7;
        let x = vector![a, a, a, 0.0, 0.0, 0.0, a, a];
        let u = vector![a, a];
        let dx = rhs(&x, &u, &nominal_inertia());
        assert_eq!(dx, State::zeros());
    }

    #[test]
    fn spring_coupling_is_antisymmetric() {
        // ディスク1がディスク2に及ぼすトルクは符号が逆 (作用反作用)
        // 接地ばねを無負荷にするため phi_m_1 = phi_1, phi_m_2 = phi_3 とし、
        // ディスク2, 3を同角にして c2 の項を消す
        let (p1, p2) = (0.8, -0.3);
        let x = vector![p1, p2, p2, 0.0, 0.0, 0.0, p1, p2];
        let u = vector![p1, p2];
        let theta = vector![1.3e-4, 2.0e-4, 3.1e-4];
        let dx = rhs(&x, &u, &theta);
        let torque_1 = theta[0] * dx[3];
        let torque_2 = theta[1] * dx[4];
        assert!(approx_equal(torque_1, -torque_2, 1e-12));
        assert!(approx_equal(torque_1, -C[1] * (p1 - p2), 1e-12));
        // ディスク3には正味トルクが働かない
        assert!(approx_equal(theta[2] * dx[5], 0.0, 1e-12));
    }

    #[test]
    fn inertia_scenarios_cover_uncertainty() {
        let scenarios = inertia_scenarios();
        assert_eq!(scenarios.len(), 9);
        // 先頭は公称値
        assert_eq!(scenarios[0], nominal_inertia());
        for s in &scenarios {
            assert!(approx_equal(s[2], THETA_NOM, 1e-18));
            assert!(s[0] >= 0.9 * THETA_NOM && s[0] <= 1.1 * THETA_NOM);
        }
    }

    #[test]
    fn measure_returns_disc_angles() {
        let x = vector![0.1, 0.2, 0.3, 4.0, 5.0, 6.0, 7.0, 8.0];
        assert_eq!(measure(&x), vector![0.1, 0.2, 0.3]);
    }
}
