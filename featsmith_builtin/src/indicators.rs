//! Rolling-window and exponential helpers over `f64` columns.
//!
//! Warm-up positions are `NaN`. Windows containing a non-finite value
//! produce `NaN`.

/// Exponentially weighted mean without bias adjustment, seeded with the
/// first finite value. Non-finite inputs carry the previous mean forward.
/// Positions before `min_periods` finite observations are `NaN`.
pub fn ewm(values: &[f64], alpha: f64, min_periods: usize) -> Vec<f64> {
    let mut result = vec![f64::NAN; values.len()];
    let mut prev: Option<f64> = None;
    let mut seen = 0usize;
    for (idx, &value) in values.iter().enumerate() {
        if value.is_finite() {
            seen += 1;
            let next = match prev {
                Some(prev_val) => alpha * value + (1.0 - alpha) * prev_val,
                None => value,
            };
            prev = Some(next);
        }
        if seen >= min_periods.max(1) {
            if let Some(current) = prev {
                result[idx] = current;
            }
        }
    }
    result
}

/// `span`-style EMA (`alpha = 2 / (period + 1)`).
pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    ewm(values, 2.0 / (period as f64 + 1.0), period)
}

/// Wilder smoothing (`alpha = 1 / period`).
pub fn rma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 {
        return vec![f64::NAN; values.len()];
    }
    ewm(values, 1.0 / period as f64, period)
}

/// Apply `f` to every full window ending at each position.
fn rolling<F>(values: &[f64], period: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let len = values.len();
    let mut result = vec![f64::NAN; len];
    if period == 0 || period > len {
        return result;
    }
    for i in period - 1..len {
        let window = &values[i + 1 - period..=i];
        if window.iter().all(|v| v.is_finite()) {
            result[i] = f(window);
        }
    }
    result
}

fn mean(window: &[f64]) -> f64 {
    window.iter().sum::<f64>() / window.len() as f64
}

/// Sum of `(x - mean)^power` over the window.
fn central_moment_sum(window: &[f64], power: i32) -> f64 {
    let m = mean(window);
    window.iter().map(|x| (x - m).powi(power)).sum()
}

pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, mean)
}

/// Rolling standard deviation with `ddof` degrees of freedom removed.
pub fn rolling_std(values: &[f64], period: usize, ddof: usize) -> Vec<f64> {
    if period <= ddof {
        return vec![f64::NAN; values.len()];
    }
    rolling(values, period, |window| {
        (central_moment_sum(window, 2) / (window.len() - ddof) as f64).sqrt()
    })
}

pub fn rolling_min(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |window| {
        window.iter().copied().fold(f64::INFINITY, f64::min)
    })
}

pub fn rolling_max(values: &[f64], period: usize) -> Vec<f64> {
    rolling(values, period, |window| {
        window.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    })
}

/// Adjusted Fisher–Pearson sample skewness. Needs three observations and a
/// non-constant window.
pub fn rolling_skew(values: &[f64], period: usize) -> Vec<f64> {
    if period < 3 {
        return vec![f64::NAN; values.len()];
    }
    rolling(values, period, |window| {
        let n = window.len() as f64;
        let m2 = central_moment_sum(window, 2) / n;
        let m3 = central_moment_sum(window, 3) / n;
        if m2 <= f64::EPSILON * mean(window).abs().max(1.0) {
            return f64::NAN;
        }
        (n * (n - 1.0)).sqrt() / (n - 2.0) * m3 / m2.powf(1.5)
    })
}

/// Bias-corrected excess kurtosis. Needs four observations and a
/// non-constant window.
pub fn rolling_kurt(values: &[f64], period: usize) -> Vec<f64> {
    if period < 4 {
        return vec![f64::NAN; values.len()];
    }
    rolling(values, period, |window| {
        let n = window.len() as f64;
        let s2 = central_moment_sum(window, 2);
        let s4 = central_moment_sum(window, 4);
        if s2 <= f64::EPSILON * mean(window).abs().max(1.0) {
            return f64::NAN;
        }
        let a = (n + 1.0) * n * (n - 1.0) / ((n - 2.0) * (n - 3.0));
        let b = 3.0 * (n - 1.0) * (n - 1.0) / ((n - 2.0) * (n - 3.0));
        a * s4 / (s2 * s2) - b
    })
}

/// Mean absolute deviation around the window mean.
fn mean_abs_deviation(window: &[f64]) -> f64 {
    let m = mean(window);
    window.iter().map(|x| (x - m).abs()).sum::<f64>() / window.len() as f64
}

/// `num / denom`, `NaN` wherever the quotient is not finite.
pub fn ratio(num: &[f64], denom: &[f64]) -> Vec<f64> {
    num.iter()
        .zip(denom.iter())
        .map(|(n, d)| finite_or_nan(n / d))
        .collect()
}

pub fn finite_or_nan(value: f64) -> f64 {
    if value.is_finite() { value } else { f64::NAN }
}

pub fn rsi(close: &[f64], period: usize) -> Vec<f64> {
    let len = close.len();
    let mut gains = vec![0.0; len];
    let mut losses = vec![0.0; len];
    for i in 1..len {
        let change = close[i] - close[i - 1];
        gains[i] = change.max(0.0);
        losses[i] = (-change).max(0.0);
    }

    let avg_gain = rma(&gains, period);
    let avg_loss = rma(&losses, period);
    avg_gain
        .iter()
        .zip(avg_loss.iter())
        .map(|(gain, loss)| {
            if !gain.is_finite() || !loss.is_finite() {
                f64::NAN
            } else if *loss == 0.0 {
                100.0
            } else {
                100.0 - (100.0 / (1.0 + gain / loss))
            }
        })
        .collect()
}

/// MACD line (`ema(fast) - ema(slow)`) and its `signal`-period EMA.
pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>) {
    let ema_fast = ema(close, fast);
    let ema_slow = ema(close, slow);
    let line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&line, signal);
    (line, signal_line)
}

/// Upper and lower bands at `mult` population standard deviations.
pub fn bollinger(close: &[f64], period: usize, mult: f64) -> (Vec<f64>, Vec<f64>) {
    let mid = sma(close, period);
    let std = rolling_std(close, period, 0);
    let upper = mid.iter().zip(std.iter()).map(|(m, s)| m + s * mult).collect();
    let lower = mid.iter().zip(std.iter()).map(|(m, s)| m - s * mult).collect();
    (upper, lower)
}

pub fn williams_r(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let highest = rolling_max(high, period);
    let lowest = rolling_min(low, period);
    (0..close.len())
        .map(|i| finite_or_nan(-100.0 * (highest[i] - close[i]) / (highest[i] - lowest[i])))
        .collect()
}

/// Fast %K over `period` and its `signal`-period mean %D.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
    signal: usize,
) -> (Vec<f64>, Vec<f64>) {
    let highest = rolling_max(high, period);
    let lowest = rolling_min(low, period);
    let k: Vec<f64> = (0..close.len())
        .map(|i| finite_or_nan(100.0 * (close[i] - lowest[i]) / (highest[i] - lowest[i])))
        .collect();
    let d = sma(&k, signal);
    (k, d)
}

fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..close.len())
        .map(|i| {
            let high_low = high[i] - low[i];
            if i == 0 {
                return high_low;
            }
            high_low
                .max((high[i] - close[i - 1]).abs())
                .max((low[i] - close[i - 1]).abs())
        })
        .collect()
}

/// Wilder-smoothed series whose first value is the plain mean of
/// `values[start..start + period]`.
fn wilder_seeded(values: &[f64], period: usize, start: usize) -> Vec<f64> {
    let len = values.len();
    let mut result = vec![f64::NAN; len];
    if period == 0 || start + period > len {
        return result;
    }
    let first = start + period - 1;
    let mut prev = mean(&values[start..=first]);
    result[first] = prev;
    for i in first + 1..len {
        prev = (prev * (period as f64 - 1.0) + values[i]) / period as f64;
        result[i] = prev;
    }
    result
}

pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    wilder_seeded(&true_range(high, low, close), period, 0)
}

/// Wilder's average directional index.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let len = close.len();
    let tr = true_range(high, low, close);
    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];
    for i in 1..len {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    // Directional movement starts at bar 1.
    let tr_s = wilder_seeded(&tr, period, 1);
    let plus_s = wilder_seeded(&plus_dm, period, 1);
    let minus_s = wilder_seeded(&minus_dm, period, 1);
    let dx: Vec<f64> = (0..len)
        .map(|i| {
            let plus_di = 100.0 * plus_s[i] / tr_s[i];
            let minus_di = 100.0 * minus_s[i] / tr_s[i];
            let sum = plus_di + minus_di;
            if sum.is_finite() && sum == 0.0 {
                0.0
            } else {
                finite_or_nan(100.0 * (plus_di - minus_di).abs() / sum)
            }
        })
        .collect();

    match dx.iter().position(|v| v.is_finite()) {
        Some(first) => wilder_seeded(&carry_forward(&dx), period, first),
        None => vec![f64::NAN; len],
    }
}

/// Replaces each non-finite value after the first finite one with the last
/// finite value seen. Leading non-finite values are kept.
fn carry_forward(values: &[f64]) -> Vec<f64> {
    let mut last: Option<f64> = None;
    values
        .iter()
        .map(|&v| {
            if v.is_finite() {
                last = Some(v);
                v
            } else {
                last.unwrap_or(v)
            }
        })
        .collect()
}

/// On-balance volume; volume is subtracted only on a strictly lower close.
pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let mut total = 0.0;
    (0..close.len())
        .map(|i| {
            if i > 0 && close[i] < close[i - 1] {
                total -= volume[i];
            } else {
                total += volume[i];
            }
            total
        })
        .collect()
}

/// Commodity channel index over the typical price.
pub fn cci(high: &[f64], low: &[f64], close: &[f64], period: usize, constant: f64) -> Vec<f64> {
    let typical: Vec<f64> = (0..close.len())
        .map(|i| (high[i] + low[i] + close[i]) / 3.0)
        .collect();
    let mid = sma(&typical, period);
    let mad = rolling(&typical, period, mean_abs_deviation);
    (0..typical.len())
        .map(|i| finite_or_nan((typical[i] - mid[i]) / (constant * mad[i])))
        .collect()
}

/// Percent change over `period` bars.
pub fn roc(values: &[f64], period: usize) -> Vec<f64> {
    values
        .iter()
        .enumerate()
        .map(|(i, &current)| {
            if i < period {
                f64::NAN
            } else {
                let base = values[i - period];
                finite_or_nan((current - base) / base * 100.0)
            }
        })
        .collect()
}
