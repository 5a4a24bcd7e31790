pub mod controller;
pub mod dsound;
pub mod usage;
