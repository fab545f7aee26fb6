pub mod clock;
pub mod configure;
pub mod generator;
pub mod logger;
pub mod uid;
