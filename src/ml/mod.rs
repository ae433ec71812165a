/*!
 * # Machine Learning Module
 *
 * Demand forecasting used by the forecast generator. One univariate model
 * is fitted per product; there is no cross-product state.
 */

/// Demand forecasting model
pub mod forecasting;

pub use forecasting::{
    DemandModel, ForecastError, Frequency, ModelConfig, PredictedPoint, SeasonalTrendModel,
    SeasonalityMode, SeriesPoint,
};
