pub mod centroid;
pub mod majority;
pub mod ranking;
