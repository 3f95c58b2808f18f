//! ASCII plotting of a voxel's signal decay for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - observed signal: `o`
//! - fitted curve: `-` line

use crate::domain::IvimParams;
use crate::models::signal_at;

/// Render observed signal (if any) and the fitted curve against b-value.
pub fn render_signal_plot(
    bvals: &[f64],
    observed: Option<&[f64]>,
    params: &IvimParams,
    kurtosis: f64,
    width: usize,
    height: usize,
) -> String {
    let (b_min, b_max) = b_range(bvals).unwrap_or((0.0, 1000.0));
    let curve = sample_curve(params, kurtosis, b_min, b_max, width.max(2));
    let points: Vec<(f64, f64)> = match observed {
        Some(observed) => bvals.iter().copied().zip(observed.iter().copied()).collect(),
        None => Vec::new(),
    };
    render_plot(&points, &curve, b_min, b_max, width, height)
}

fn render_plot(
    points: &[(f64, f64)],
    curve: &[(f64, f64)],
    b_min: f64,
    b_max: f64,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let (s_min, s_max) = s_range(points, curve).unwrap_or((0.0, 1.0));
    let (s_min, s_max) = pad_range(s_min, s_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Curve first so observed points overlay it.
    draw_curve(&mut grid, curve, b_min, b_max, s_min, s_max);

    for &(b, s) in points {
        let x = map_x(b, b_min, b_max, width);
        let y = map_y(s, s_min, s_max, height);
        grid[y][x] = 'o';
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Plot: b=[{b_min:.0}, {b_max:.0}] s/mm^2 | S=[{s_min:.2}, {s_max:.2}]\n"
    ));

    for row in grid {
        out.push_str(&row.into_iter().collect::<String>());
        out.push('\n');
    }

    out
}

fn b_range(bvals: &[f64]) -> Option<(f64, f64)> {
    let mut min_b = f64::INFINITY;
    let mut max_b = f64::NEG_INFINITY;
    for &b in bvals {
        min_b = min_b.min(b);
        max_b = max_b.max(b);
    }
    if min_b.is_finite() && max_b.is_finite() && max_b > min_b {
        Some((min_b, max_b))
    } else {
        None
    }
}

fn sample_curve(params: &IvimParams, kurtosis: f64, b_min: f64, b_max: f64, n: usize) -> Vec<(f64, f64)> {
    let n = n.max(2);
    (0..n)
        .map(|i| {
            let u = i as f64 / (n as f64 - 1.0);
            let b = b_min + u * (b_max - b_min);
            (b, signal_at(params, kurtosis, b))
        })
        .collect()
}

fn s_range(points: &[(f64, f64)], curve: &[(f64, f64)]) -> Option<(f64, f64)> {
    let mut min_s = f64::INFINITY;
    let mut max_s = f64::NEG_INFINITY;
    for &(_, s) in points.iter().chain(curve) {
        if s.is_finite() {
            min_s = min_s.min(s);
            max_s = max_s.max(s);
        }
    }

    if min_s.is_finite() && max_s.is_finite() && max_s > min_s {
        Some((min_s, max_s))
    } else {
        None
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(b: f64, b_min: f64, b_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((b - b_min) / (b_max - b_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(s: f64, s_min: f64, s_max: f64, height: usize) -> usize {
    let height = height.max(2);
    // NaN clamps to NaN; `as usize` saturates it to 0.
    let u = ((s - s_min) / (s_max - s_min)).clamp(0.0, 1.0);
    // top row is the largest signal
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

fn draw_curve(grid: &mut [Vec<char>], curve: &[(f64, f64)], b_min: f64, b_max: f64, s_min: f64, s_max: f64) {
    if curve.len() < 2 {
        return;
    }
    let height = grid.len();
    let width = grid[0].len();

    let mut prev = None;
    for &(b, s) in curve {
        let x = map_x(b, b_min, b_max, width);
        let y = map_y(s, s_min, s_max, height);
        if let Some((x0, y0)) = prev {
            draw_line(grid, x0, y0, x, y, '-');
        } else {
            grid[y][x] = '-';
        }
        prev = Some((x, y));
    }
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], x0: usize, y0: usize, x1: usize, y1: usize, ch: char) {
    let mut x0 = x0 as isize;
    let mut y0 = y0 as isize;
    let x1 = x1 as isize;
    let y1 = y1 as isize;

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(s0: f64) -> IvimParams {
        IvimParams {
            s0,
            f: 0.0,
            d_star: 0.0,
            d: 0.0,
        }
    }

    #[test]
    fn plot_golden_snapshot_small() {
        let txt = render_signal_plot(&[0.0, 1000.0], Some(&[100.0, 110.0]), &flat(100.0), 0.0, 10, 5);
        let expected = concat!(
            "Plot: b=[0, 1000] s/mm^2 | S=[99.50, 110.50]\n",
            "         o\n",
            "          \n",
            "          \n",
            "          \n",
            "o---------\n",
        );
        assert_eq!(txt, expected);
    }

    #[test]
    fn curve_only_plot_decays_left_to_right() {
        let params = IvimParams {
            s0: 1000.0,
            f: 0.1,
            d_star: 0.01,
            d: 0.001,
        };
        let txt = render_signal_plot(&[0.0, 500.0, 1000.0], None, &params, 0.5, 20, 8);
        let lines: Vec<&str> = txt.lines().collect();
        assert_eq!(lines.len(), 9);
        assert!(!txt.contains('o'));
        assert!(lines[1].starts_with('-'));
        assert!(lines[8].ends_with('-'));
    }
}
