pub mod forecast;
pub mod product;
pub mod sales_history;
pub mod stock_alert;
