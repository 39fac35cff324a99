pub mod central;
pub mod peripheral;
