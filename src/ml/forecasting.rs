//! Univariate demand forecasting.
//!
//! The model decomposes a sales series into a linear trend and Fourier
//! seasonal terms (weekly and yearly, no intra-day component), fitted by
//! least squares. Seasonality is multiplicative unless the fitted trend
//! reaches zero, in which case the additive form is used.

use chrono::{Days, Months, NaiveDate};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Minimum number of observations required before a product is forecast.
pub const DEFAULT_MIN_POINTS: usize = 5;

const WEEKLY_PERIOD_DAYS: f64 = 7.0;
const YEARLY_PERIOD_DAYS: f64 = 365.25;
const WEEKLY_FOURIER_ORDER: usize = 3;
const YEARLY_FOURIER_ORDER: usize = 3;
const MIN_WEEKLY_SPAN_DAYS: f64 = 14.0;
const MIN_YEARLY_SPAN_DAYS: f64 = 365.0;
/// Ridge penalty applied to the seasonal coefficients.
const SEASONALITY_PRIOR: f64 = 1.0;
/// Two-sided z-score of an 80% interval.
const INTERVAL_Z: f64 = 1.281_551_565_545;

/// Sampling granularity of forecast periods
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[serde(alias = "D", alias = "d")]
    #[strum(to_string = "daily", serialize = "D", serialize = "d")]
    Daily,
    #[serde(alias = "W", alias = "w")]
    #[strum(to_string = "weekly", serialize = "W", serialize = "w")]
    Weekly,
    #[serde(alias = "M", alias = "m")]
    #[strum(to_string = "monthly", serialize = "M", serialize = "m")]
    Monthly,
}

impl Default for Frequency {
    fn default() -> Self {
        Frequency::Daily
    }
}

impl Frequency {
    /// Date `steps` periods after `date`, or `None` if it leaves the calendar range.
    pub fn advance(self, date: NaiveDate, steps: u32) -> Option<NaiveDate> {
        match self {
            Frequency::Daily => date.checked_add_days(Days::new(u64::from(steps))),
            Frequency::Weekly => date.checked_add_days(Days::new(7 * u64::from(steps))),
            Frequency::Monthly => date.checked_add_months(Months::new(steps)),
        }
    }
}

/// How seasonal terms combine with the trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

/// One observed (date, quantity) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub quantity: f64,
}

/// One forecast row, clamped at zero and rounded to two decimals
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedPoint {
    pub date: NaiveDate,
    pub predicted_qty: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForecastError {
    #[error("insufficient sales history: {actual} points, at least {required} required")]
    InsufficientData { required: usize, actual: usize },

    #[error("invalid sales series: {0}")]
    InvalidSeries(String),

    #[error("model fit failed: {0}")]
    ModelFit(String),
}

impl ForecastError {
    /// Errors caused by the input data rather than the model; the product is skipped.
    pub fn is_data_problem(&self) -> bool {
        matches!(
            self,
            ForecastError::InsufficientData { .. } | ForecastError::InvalidSeries(_)
        )
    }
}

/// Contract of a univariate forecasting algorithm.
///
/// Implementations are pure: they only look at the series they are given and
/// return rows for the `horizon` periods following its last observation.
pub trait DemandModel: Send + Sync {
    fn fit_predict(
        &self,
        series: &[SeriesPoint],
        horizon: u32,
        frequency: Frequency,
    ) -> Result<Vec<PredictedPoint>, ForecastError>;
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub min_points: usize,
    pub weekly_seasonality: bool,
    pub yearly_seasonality: bool,
    pub seasonality_mode: SeasonalityMode,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            min_points: DEFAULT_MIN_POINTS,
            weekly_seasonality: true,
            yearly_seasonality: true,
            seasonality_mode: SeasonalityMode::Multiplicative,
        }
    }
}

/// Trend + Fourier seasonality model
#[derive(Debug, Clone, Default)]
pub struct SeasonalTrendModel {
    config: ModelConfig,
}

struct FittedModel {
    origin: NaiveDate,
    scale: f64,
    intercept: f64,
    slope: f64,
    seasonal_periods: Vec<(f64, usize)>,
    seasonal_coef: Option<DVector<f64>>,
    mode: SeasonalityMode,
    sigma: f64,
    observations: usize,
}

impl FittedModel {
    fn trend(&self, day: f64) -> f64 {
        self.intercept + self.slope * day / self.scale
    }

    fn seasonal(&self, day: f64) -> f64 {
        match &self.seasonal_coef {
            Some(coef) => fourier_row(day, &self.seasonal_periods)
                .iter()
                .zip(coef.iter())
                .map(|(x, b)| x * b)
                .sum(),
            None => 0.0,
        }
    }

    fn predict(&self, day: f64) -> f64 {
        let trend = self.trend(day);
        let seasonal = self.seasonal(day);
        match self.mode {
            SeasonalityMode::Multiplicative => trend * (1.0 + seasonal),
            SeasonalityMode::Additive => trend + seasonal,
        }
    }
}

impl SeasonalTrendModel {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    fn validate(&self, series: &[SeriesPoint]) -> Result<(), ForecastError> {
        if series.len() < self.config.min_points {
            return Err(ForecastError::InsufficientData {
                required: self.config.min_points,
                actual: series.len(),
            });
        }

        if let Some(bad) = series
            .iter()
            .find(|p| !p.quantity.is_finite() || p.quantity < 0.0)
        {
            return Err(ForecastError::InvalidSeries(format!(
                "quantity {} on {} is not a non-negative number",
                bad.quantity, bad.date
            )));
        }

        if let Some(pair) = series.windows(2).find(|w| w[1].date <= w[0].date) {
            return Err(ForecastError::InvalidSeries(format!(
                "dates must be strictly increasing ({} follows {})",
                pair[1].date, pair[0].date
            )));
        }

        Ok(())
    }

    fn seasonal_periods(&self, span_days: f64, observations: usize) -> Vec<(f64, usize)> {
        let mut periods = Vec::new();
        if self.config.weekly_seasonality && span_days >= MIN_WEEKLY_SPAN_DAYS {
            periods.push((WEEKLY_PERIOD_DAYS, WEEKLY_FOURIER_ORDER));
        }
        if self.config.yearly_seasonality && span_days >= MIN_YEARLY_SPAN_DAYS {
            periods.push((YEARLY_PERIOD_DAYS, YEARLY_FOURIER_ORDER));
        }

        // Drop the longest period first until the terms are identifiable.
        while !periods.is_empty() && observations < feature_count(&periods) + 3 {
            periods.pop();
        }
        periods
    }

    fn fit(&self, series: &[SeriesPoint]) -> Result<FittedModel, ForecastError> {
        let n = series.len();
        let origin = series[0].date;
        let days: Vec<f64> = series
            .iter()
            .map(|p| (p.date - origin).num_days() as f64)
            .collect();
        let span_days = days[n - 1];
        let scale = span_days.max(1.0);
        let y = DVector::from_iterator(n, series.iter().map(|p| p.quantity));

        let trend_design = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { days[i] / scale });
        let trend_coef = solve_least_squares(&trend_design, &y, 0.0)?;
        let (intercept, slope) = (trend_coef[0], trend_coef[1]);
        let trend: Vec<f64> = days.iter().map(|d| intercept + slope * d / scale).collect();

        let mode = match self.config.seasonality_mode {
            SeasonalityMode::Multiplicative if trend.iter().all(|t| *t > 0.0) => {
                SeasonalityMode::Multiplicative
            }
            _ => SeasonalityMode::Additive,
        };

        let seasonal_periods = self.seasonal_periods(span_days, n);
        let seasonal_coef = if seasonal_periods.is_empty() {
            None
        } else {
            // Multiplicative terms enter as trend * seasonal, so the design rows
            // carry the trend instead of dividing the observations by it.
            let k = feature_count(&seasonal_periods);
            let rows: Vec<f64> = days
                .iter()
                .zip(trend.iter())
                .flat_map(|(d, t)| {
                    let weight = match mode {
                        SeasonalityMode::Multiplicative => *t,
                        SeasonalityMode::Additive => 1.0,
                    };
                    fourier_row(*d, &seasonal_periods)
                        .into_iter()
                        .map(move |x| x * weight)
                })
                .collect();
            let design = DMatrix::from_row_slice(n, k, &rows);
            let target = DVector::from_iterator(
                n,
                series.iter().zip(trend.iter()).map(|(p, t)| p.quantity - t),
            );
            Some(solve_least_squares(&design, &target, SEASONALITY_PRIOR)?)
        };

        let mut fitted = FittedModel {
            origin,
            scale,
            intercept,
            slope,
            seasonal_periods,
            seasonal_coef,
            mode,
            sigma: 0.0,
            observations: n,
        };

        let parameters = 2 + feature_count(&fitted.seasonal_periods);
        let sse: f64 = series
            .iter()
            .zip(days.iter())
            .map(|(p, d)| (p.quantity - fitted.predict(*d)).powi(2))
            .sum();
        fitted.sigma = (sse / n.saturating_sub(parameters).max(1) as f64).sqrt();

        if !fitted.sigma.is_finite() || !intercept.is_finite() || !slope.is_finite() {
            return Err(ForecastError::ModelFit(
                "non-finite model parameters".to_string(),
            ));
        }

        Ok(fitted)
    }
}

impl DemandModel for SeasonalTrendModel {
    fn fit_predict(
        &self,
        series: &[SeriesPoint],
        horizon: u32,
        frequency: Frequency,
    ) -> Result<Vec<PredictedPoint>, ForecastError> {
        self.validate(series)?;
        if horizon == 0 {
            return Ok(Vec::new());
        }

        let fitted = self.fit(series)?;
        let last = series[series.len() - 1].date;

        (1..=horizon)
            .map(|step| {
                let date = frequency.advance(last, step).ok_or_else(|| {
                    ForecastError::ModelFit(format!("forecast step {step} leaves the calendar"))
                })?;
                let day = (date - fitted.origin).num_days() as f64;
                let yhat = fitted.predict(day);
                let half_width = INTERVAL_Z
                    * fitted.sigma
                    * (1.0 + f64::from(step) / fitted.observations as f64).sqrt();

                if !yhat.is_finite() || !half_width.is_finite() {
                    return Err(ForecastError::ModelFit(format!(
                        "non-finite prediction for {date}"
                    )));
                }

                Ok(PredictedPoint {
                    date,
                    predicted_qty: round2(yhat.max(0.0)),
                    lower_bound: round2((yhat - half_width).max(0.0)),
                    upper_bound: round2((yhat + half_width).max(0.0)),
                })
            })
            .collect()
    }
}

/// Rounds to two fractional digits, normalising negative zero.
pub fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

fn feature_count(periods: &[(f64, usize)]) -> usize {
    periods.iter().map(|(_, order)| 2 * order).sum()
}

fn fourier_row(day: f64, periods: &[(f64, usize)]) -> Vec<f64> {
    let mut row = Vec::with_capacity(feature_count(periods));
    for (period, order) in periods {
        for k in 1..=*order {
            let angle = 2.0 * PI * k as f64 * day / period;
            row.push(angle.sin());
            row.push(angle.cos());
        }
    }
    row
}

/// Ridge-regularised least squares; falls back to SVD when the normal
/// equations are not positive definite.
fn solve_least_squares(
    design: &DMatrix<f64>,
    target: &DVector<f64>,
    ridge: f64,
) -> Result<DVector<f64>, ForecastError> {
    let transposed = design.transpose();
    let mut gram = &transposed * design;
    for i in 0..gram.nrows() {
        gram[(i, i)] += ridge;
    }
    let rhs = &transposed * target;

    if let Some(cholesky) = gram.cholesky() {
        return Ok(cholesky.solve(&rhs));
    }

    design
        .clone()
        .svd(true, true)
        .solve(target, 1e-10)
        .map_err(|e| ForecastError::ModelFit(e.to_string()))
}
