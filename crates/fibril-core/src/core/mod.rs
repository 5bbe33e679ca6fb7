pub mod models;
pub mod params;
pub mod random;
pub mod space;
pub mod utils;
