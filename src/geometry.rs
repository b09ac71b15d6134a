//! 正規化座標系での2D幾何ユーティリティ

/// 2点間のユークリッド距離
pub fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

pub fn midpoint(a: [f32; 2], b: [f32; 2]) -> [f32; 2] {
    [(a[0] + b[0]) / 2.0, (a[1] + b[1]) / 2.0]
}

/// vertex で a と c が成す角（度, 0〜180）
///
/// どちらかの辺の長さが 0 なら 0 を返す。
pub fn angle_at_vertex(a: [f32; 2], vertex: [f32; 2], c: [f32; 2]) -> f32 {
    let v1 = [a[0] - vertex[0], a[1] - vertex[1]];
    let v2 = [c[0] - vertex[0], c[1] - vertex[1]];
    let len1 = (v1[0] * v1[0] + v1[1] * v1[1]).sqrt();
    let len2 = (v2[0] * v2[0] + v2[1] * v2[1]).sqrt();
    if len1 <= f32::EPSILON || len2 <= f32::EPSILON {
        return 0.0;
    }
    let cos = ((v1[0] * v2[0] + v1[1] * v2[1]) / (len1 * len2)).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

/// from → to ベクトルと鉛直軸の成す角（度, 0〜90）。上下の向きは問わない
pub fn angle_from_vertical(from: [f32; 2], to: [f32; 2]) -> f32 {
    let dx = (to[0] - from[0]).abs();
    let dy = (to[1] - from[1]).abs();
    if dx <= f32::EPSILON && dy <= f32::EPSILON {
        return 0.0;
    }
    dx.atan2(dy).to_degrees()
}

/// from → to ベクトルと水平軸の成す角（度, 0〜90）
pub fn angle_from_horizontal(from: [f32; 2], to: [f32; 2]) -> f32 {
    let dx = (to[0] - from[0]).abs();
    let dy = (to[1] - from[1]).abs();
    if dx <= f32::EPSILON && dy <= f32::EPSILON {
        return 0.0;
    }
    dy.atan2(dx).to_degrees()
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// IQR で外れ値を除いた平均
///
/// 3サンプル未満、またはフィルタ後に空になった場合は単純平均。空なら 0。
pub fn filter_outliers_and_average(values: &[f32]) -> f32 {
    if values.len() < 3 {
        return mean(values);
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let q1 = sorted[n / 4];
    let q3 = sorted[(3 * n) / 4];
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;

    let kept: Vec<f32> = sorted
        .into_iter()
        .filter(|v| *v >= lower && *v <= upper)
        .collect();

    if kept.is_empty() {
        mean(values)
    } else {
        mean(&kept)
    }
}

/// 変動係数（標準偏差 / 平均）。平均が 0 なら 0
pub fn coefficient_of_variation(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    if m.abs() <= f32::EPSILON {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / values.len() as f32;
    variance.sqrt() / m
}
