pub mod health;
pub mod session;
pub mod ticker_stream;
