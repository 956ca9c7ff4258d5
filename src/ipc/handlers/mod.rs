pub mod attendance;
pub mod auth;
pub mod core;
pub mod exchange;
pub mod grades;
pub mod idcard;
pub mod reports;
pub mod sf9;
pub mod users;
pub mod workbook;
