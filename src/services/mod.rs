// Forecast generation
pub mod forecast_jobs;
pub mod forecasting;

// Reorder alerting
pub mod alerts;

// Sales history ingestion
pub mod sales_import;
