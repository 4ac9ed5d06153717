pub mod shop;
pub mod variant;
