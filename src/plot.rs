use crate::pinn::Prediction;
use plotters::prelude::*;
use std::path::Path;

pub type PlotResult = Result<(), Box<dyn std::error::Error>>;

/// 学習過程の損失をグラフとしてPNGファイルに出力します。
///
/// 縦軸は log10 で、有限かつ正の値だけを描画します。`d_losses` や
/// `val_losses` が空ならその系列は描きません。
pub fn plot_loss_history(
    path: &Path,
    g_losses: &[f32],
    d_losses: &[f32],
    val_losses: &[f32],
) -> PlotResult {
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let (min_log_loss, max_log_loss) = log_range(g_losses.iter().chain(d_losses).chain(val_losses));
    let epochs = g_losses.len().max(d_losses.len()).max(val_losses.len()).max(1);
    let mut chart = ChartBuilder::on(&root)
        .caption("Loss History", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..epochs, min_log_loss..max_log_loss)?;
    chart
        .configure_mesh()
        .y_desc("Loss (log10 scale)")
        .x_desc("Epochs")
        .draw()?;
    chart
        .draw_series(LineSeries::new(log_points(g_losses), &RED))?
        .label("Generator Loss")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    if !d_losses.is_empty() {
        chart
            .draw_series(LineSeries::new(log_points(d_losses), &BLUE))?
            .label("Discriminator Loss")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    }
    if !val_losses.is_empty() {
        chart
            .draw_series(LineSeries::new(log_points(val_losses), &GREEN))?
            .label("Validation Loss")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &GREEN));
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// 予測と参照解を重ねて描画します。
///
/// 1次元の問題は折れ線、2次元の問題は予測と誤差のヒートマップを横に並べます。
pub fn plot_predictions(path: &Path, prediction: &Prediction) -> PlotResult {
    if prediction.dim == 2 {
        return plot_field(path, prediction);
    }
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let xs = &prediction.points;
    let (x_min, x_max) = bounds(xs.iter());
    let (y_min, y_max) = bounds(prediction.predicted.iter().chain(&prediction.reference));
    let margin = ((y_max - y_min) * 0.05).max(1e-3);
    let mut chart = ChartBuilder::on(&root)
        .caption("Prediction", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, (y_min - margin)..(y_max + margin))?;
    chart.configure_mesh().x_desc("t").y_desc("x").draw()?;
    chart
        .draw_series(LineSeries::new(
            xs.iter().copied().zip(prediction.reference.iter().copied()),
            &BLUE,
        ))?
        .label("Reference")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
    chart
        .draw_series(LineSeries::new(
            xs.iter()
                .copied()
                .zip(prediction.predicted.iter().copied())
                .filter(|(_, y)| y.is_finite()),
            &RED,
        ))?
        .label("Prediction")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// 予測とその微分を重ねて描画します（1次元の問題のみ）。
pub fn plot_derivatives(path: &Path, prediction: &Prediction) -> PlotResult {
    let derivative = prediction
        .derivative
        .as_ref()
        .ok_or("この問題には描画する微分がありません")?;
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let xs = &prediction.points;
    let (x_min, x_max) = bounds(xs.iter());
    let (y_min, y_max) = bounds(prediction.predicted.iter().chain(&derivative.values));
    let margin = ((y_max - y_min) * 0.05).max(1e-3);
    let mut chart = ChartBuilder::on(&root)
        .caption("Derivatives", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x_min..x_max, (y_min - margin)..(y_max + margin))?;
    chart.configure_mesh().x_desc("t").draw()?;
    chart
        .draw_series(LineSeries::new(
            xs.iter().copied().zip(prediction.predicted.iter().copied()),
            &RED,
        ))?
        .label("x")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));
    let label = if derivative.order == 1 { "dx/dt" } else { "d2x/dt2" };
    chart
        .draw_series(LineSeries::new(
            xs.iter().copied().zip(derivative.values.iter().copied()),
            &GREEN,
        ))?
        .label(label)
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &GREEN));
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// 格子上の各点での残差の二乗を位置に対して描画します（1次元の問題のみ）。
pub fn plot_residuals(path: &Path, prediction: &Prediction) -> PlotResult {
    let squared: Vec<f32> = prediction.residual.iter().map(|r| r * r).collect();
    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let (x_min, x_max) = bounds(prediction.points.iter());
    let (_, y_max) = bounds(squared.iter());
    let mut chart = ChartBuilder::on(&root)
        .caption("Squared residual vs. position", ("sans-serif", 40).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0f32..(y_max * 1.05).max(f32::EPSILON))?;
    chart
        .configure_mesh()
        .x_desc("position")
        .y_desc("residual^2")
        .draw()?;
    chart.draw_series(
        prediction
            .points
            .iter()
            .zip(&squared)
            .filter(|(_, r)| r.is_finite())
            .map(|(x, r)| Circle::new((*x, *r), 2, BLUE.filled())),
    )?;
    root.present()?;
    Ok(())
}

fn plot_field(path: &Path, prediction: &Prediction) -> PlotResult {
    let root = BitMapBackend::new(path, (1200, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));

    let xs: Vec<f32> = prediction.points.iter().step_by(2).copied().collect();
    let ys: Vec<f32> = prediction.points.iter().skip(1).step_by(2).copied().collect();
    let (x_min, x_max) = bounds(xs.iter());
    let (y_min, y_max) = bounds(ys.iter());
    // 格子は軸ごとに等間隔なので、1セルの大きさは異なる座標の個数から求まる
    let cell_x = (x_max - x_min) / (distinct(&xs).max(2) - 1) as f32;
    let cell_y = (y_max - y_min) / (distinct(&ys).max(2) - 1) as f32;

    let errors: Vec<f32> = prediction
        .predicted
        .iter()
        .zip(&prediction.reference)
        .map(|(p, r)| (p - r).abs())
        .collect();
    let fields = [("Prediction", &prediction.predicted), ("|Error|", &errors)];

    for (panel, (caption, values)) in panels.iter().zip(fields) {
        let (v_min, v_max) = bounds(values.iter());
        let span = (v_max - v_min).max(f32::EPSILON);
        let mut chart = ChartBuilder::on(panel)
            .caption(caption, ("sans-serif", 30).into_font())
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(
                (x_min - cell_x / 2.0)..(x_max + cell_x / 2.0),
                (y_min - cell_y / 2.0)..(y_max + cell_y / 2.0),
            )?;
        chart.configure_mesh().x_desc("x").y_desc("y").draw()?;
        chart.draw_series(xs.iter().zip(&ys).zip(values.iter()).map(|((x, y), v)| {
            let level = if v.is_finite() { (v - v_min) / span } else { 1.0 };
            let color = HSLColor(0.66 * (1.0 - level as f64), 0.8, 0.5);
            Rectangle::new(
                [
                    (x - cell_x / 2.0, y - cell_y / 2.0),
                    (x + cell_x / 2.0, y + cell_y / 2.0),
                ],
                color.filled(),
            )
        }))?;
    }
    root.present()?;
    Ok(())
}

fn log_points(values: &[f32]) -> impl Iterator<Item = (usize, f32)> + '_ {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite() && **v > 0.0)
        .map(|(i, v)| (i, v.log10()))
}

/// 有限かつ正の値の log10 の範囲。描画できる値がなければ `(-6, 0)`。
fn log_range<'a>(values: impl Iterator<Item = &'a f32>) -> (f32, f32) {
    let logs: Vec<f32> = values
        .filter(|v| v.is_finite() && **v > 0.0)
        .map(|v| v.log10())
        .collect();
    if logs.is_empty() {
        return (-6.0, 0.0);
    }
    let (min, max) = bounds(logs.iter());
    (min - 0.5, max + 0.5)
}

/// 有限な値の最小値と最大値。幅が0のときは少し広げます。
fn bounds<'a>(values: impl Iterator<Item = &'a f32>) -> (f32, f32) {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if min > max {
        (0.0, 1.0)
    } else if min == max {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

fn distinct(values: &[f32]) -> usize {
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted.dedup();
    sorted.len()
}
