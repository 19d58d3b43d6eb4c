pub mod events;
pub mod nodata;
pub mod ratio;
pub mod threshold;
pub mod year_round;
