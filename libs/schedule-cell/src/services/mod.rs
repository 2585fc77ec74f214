pub mod assignment;
pub mod coverage;
pub mod directory;
pub mod generator;
pub mod slots;
