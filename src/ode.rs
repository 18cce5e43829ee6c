//! 参照解を求めるための数値積分。

/// 固定刻みの4次ルンゲ＝クッタ法で `y' = f(t, y)` を `t0` から `t1` まで積分します。
///
/// 刻み幅は `max_step` を超えない範囲で区間を等分して決めます。`t1 < t0` の場合は
/// 負の向きに積分します。
pub fn rk4<F>(f: F, y0: &[f64], t0: f64, t1: f64, max_step: f64) -> Vec<f64>
where
    F: Fn(f64, &[f64]) -> Vec<f64>,
{
    let span = t1 - t0;
    let steps = (span.abs() / max_step).ceil().max(1.0) as usize;
    let h = span / steps as f64;

    let mut t = t0;
    let mut y = y0.to_vec();
    for _ in 0..steps {
        let k1 = f(t, &y);
        let k2 = f(t + h / 2.0, &offset(&y, &k1, h / 2.0));
        let k3 = f(t + h / 2.0, &offset(&y, &k2, h / 2.0));
        let k4 = f(t + h, &offset(&y, &k3, h));
        for i in 0..y.len() {
            y[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
        t += h;
    }
    y
}

fn offset(y: &[f64], k: &[f64], h: f64) -> Vec<f64> {
    y.iter().zip(k).map(|(y, k)| y + h * k).collect()
}
