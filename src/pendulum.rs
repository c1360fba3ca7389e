use na::vector;

// 台車上の倒立振子 (カートペンデュラム)
// 状態変数は x, dx, theta, dtheta の4つ (theta = 0 が直立)
// 入力は台車への水平力 [N]

pub const X_DIM: usize = 4;
pub const U_DIM: usize = 1;

pub type State = na::SVector<f64, X_DIM>;
pub type Input = na::SVector<f64, U_DIM>;
// 不確かパラメータなし
pub type NoParams = na::SVector<f64, 0>;

// 台車の質量 [kg]
pub const M_CART: f64 = 0.6;
// 振子の質量 [kg]
pub const M_POLE: f64 = 0.2;
// 回転軸から重心までの距離 [m]
pub const L: f64 = 0.5;
// 重心まわりの慣性モーメント (一様な棒) [kg m^2]
pub const J: f64 = M_POLE * (2.0 * L) * (2.0 * L) / 12.0;
pub const G: f64 = 9.81;

// 系ダイナミクスを記述
pub fn rhs(x: &State, u: &Input, _p: &NoParams) -> State {
    let (theta, dtheta) = (x[2], x[3]);
    let (sin, cos) = (theta.sin(), theta.cos());
    let f = u[0];

    let d = (M_CART + M_POLE) * (J + M_POLE * L * L) - (M_POLE * L * cos).powi(2);
    let ddx = ((J + M_POLE * L * L) * (f + M_POLE * L * dtheta * dtheta * sin)
        - M_POLE * M_POLE * G * L * L * sin * cos)
        / d;
    let ddtheta = ((M_CART + M_POLE) * M_POLE * G * L * sin
        - M_POLE * L * cos * (f + M_POLE * L * dtheta * dtheta * sin))
        / d;
    vector![x[1], ddx, dtheta, ddtheta]
}
