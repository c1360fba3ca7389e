// 古典的ルンゲクッタ法 (4次) の1ステップ
pub fn rk4_step<const N: usize, F>(
    f: F,
    x: &na::SVector<f64, N>,
    dt: f64,
) -> na::SVector<f64, N>
where
    F: Fn(&na::SVector<f64, N>) -> na::SVector<f64, N>,
{
    let k1 = f(x);
    let k2 = f(&(x + 0.5 * dt * k1));
    let k3 = f(&(x + 0.5 * dt * k2));
    let k4 = f(&(x + dt * k3));
    x + dt / 6.0 * (k1 + 2.0 * (k2 + k3) + k4)
}

// 1プラントステップを substeps 分割して積分する
pub fn integrate<const N: usize, F>(
    f: F,
    x: &na::SVector<f64, N>,
    dt: f64,
    substeps: usize,
) -> na::SVector<f64, N>
where
    F: Fn(&na::SVector<f64, N>) -> na::SVector<f64, N>,
{
    let h = dt / substeps as f64;
    let mut r = *x;
    for _ in 0..substeps {
        r = rk4_step(&f, &r, h);
    }
    r
}
